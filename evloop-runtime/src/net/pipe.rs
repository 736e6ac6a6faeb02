//! Anonymous pipe support, built on the `os_pipe` crate. A pipe handle is
//! half-duplex by construction (an OS anonymous pipe has one read end and
//! one write end); this wraps whichever end the caller owns behind the same
//! [`crate::stream::RawStream`]/[`crate::stream::StreamState`] machinery TCP
//! uses, so `read_start`/`write`/`shutdown` behave identically.

use evloop_driver::RawFd;
use evloop_log::instrument;
use os_pipe::{PipeReader, PipeWriter};

use crate::{
    error::Result,
    handle::{HandleId, HandleKind},
    loop_core::Loop,
    stream::{RawStream, StreamState},
};

enum PipeEnd {
    Read(PipeReader),
    Write(PipeWriter),
}

struct PipeIo {
    end: PipeEnd,
}

impl RawStream for PipeIo {
    fn raw_fd(&self) -> RawFd {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            match &self.end {
                PipeEnd::Read(r) => r.as_raw_fd(),
                PipeEnd::Write(w) => w.as_raw_fd(),
            }
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawHandle;
            match &self.end {
                PipeEnd::Read(r) => r.as_raw_handle() as RawFd,
                PipeEnd::Write(w) => w.as_raw_handle() as RawFd,
            }
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::io::Read;
        match &mut self.end {
            PipeEnd::Read(r) => r.read(buf),
            PipeEnd::Write(_) => Err(std::io::Error::from(std::io::ErrorKind::Unsupported)),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        use std::io::Write;
        match &mut self.end {
            PipeEnd::Write(w) => w.write(buf),
            PipeEnd::Read(_) => Err(std::io::Error::from(std::io::ErrorKind::Unsupported)),
        }
    }

    fn shutdown_write(&mut self) -> std::io::Result<()> {
        // An anonymous pipe's write end is closed by dropping it; there is
        // no partial-shutdown primitive, so this is a no-op that the stream
        // state machine's close path turns into an actual close.
        Ok(())
    }
}

#[cfg(unix)]
fn set_nonblocking(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}

#[cfg(windows)]
fn set_nonblocking(_fd: RawFd) {}

/// Create a connected pipe pair, returning `(read_handle, write_handle)`.
pub fn pipe_pair(loop_: &Loop) -> Result<(HandleId, HandleId)> {
    instrument!(evloop_log::Level::TRACE, "pipe_pair");
    let (reader, writer) = os_pipe::pipe().map_err(|_| crate::error::Error::Invariant("os_pipe creation failed"))?;
    let reader_io = PipeIo { end: PipeEnd::Read(reader) };
    let writer_io = PipeIo { end: PipeEnd::Write(writer) };
    set_nonblocking(reader_io.raw_fd());
    set_nonblocking(writer_io.raw_fd());
    let read_handle = loop_
        .inner
        .borrow_mut()
        .registry
        .init(HandleKind::Pipe(StreamState::new(Box::new(reader_io))));
    let write_handle = loop_
        .inner
        .borrow_mut()
        .registry
        .init(HandleKind::Pipe(StreamState::new(Box::new(writer_io))));
    Ok((read_handle, write_handle))
}
