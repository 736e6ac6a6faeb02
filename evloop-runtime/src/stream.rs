//! The stream I/O state machine shared by TCP, pipe, and (eventually) TTY
//! handles: read start/stop, a write queue with back-pressure, shutdown, and
//! close-time draining.
//!
//! This module is generic over the concrete transport through the
//! [`RawStream`] trait; [`crate::net::tcp`] and [`crate::net::pipe`]
//! implement it over `std`/`socket2`/`os_pipe` sockets. The state machine
//! itself never touches a socket directly.

use std::collections::VecDeque;

use evloop_driver::{Interest, RawFd};
use evloop_log::instrument;

use crate::{
    error::{Error, Result},
    handle::HandleId,
    loop_core::Loop,
};

/// What a read attempt produced.
#[derive(Debug)]
pub enum ReadResult<'a> {
    /// The allocator handed back an empty buffer; no read was attempted.
    /// Equivalent to the design's `nread == 0, buffer unused`.
    Pending,
    /// `buf[..n]` holds payload.
    Data(&'a [u8]),
    /// The peer shut down its write side.
    Eof,
    /// A read error.
    Error(Error),
}

/// One concrete transport a [`StreamState`] drives: a non-blocking
/// duplex byte stream plus its pollable fd.
pub trait RawStream: Send {
    fn raw_fd(&self) -> RawFd;
    fn try_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn try_write(&mut self, buf: &[u8]) -> std::io::Result<usize>;
    fn shutdown_write(&mut self) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Idle,
    Reading,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Writable,
    Shutting,
    Shut,
    Closed,
}

struct WriteRequest {
    buf: Vec<u8>,
    offset: usize,
    callback: Option<Box<dyn FnOnce(Result<()>)>>,
}

/// Per-handle state for a stream-shaped handle (tcp/pipe/tty).
pub struct StreamState {
    io: Box<dyn RawStream>,
    read_state: ReadState,
    write_state: WriteState,
    write_queue: VecDeque<WriteRequest>,
    write_queue_bytes: usize,
    alloc_cb: Option<Box<dyn FnMut(usize) -> Vec<u8>>>,
    read_cb: Option<Box<dyn FnMut(ReadResult<'_>)>>,
    shutdown_cb: Option<Box<dyn FnOnce(Result<()>)>>,
    registered: bool,
}

impl StreamState {
    pub fn new(io: Box<dyn RawStream>) -> Self {
        Self {
            io,
            read_state: ReadState::Idle,
            write_state: WriteState::Writable,
            write_queue: VecDeque::new(),
            write_queue_bytes: 0,
            alloc_cb: None,
            read_cb: None,
            shutdown_cb: None,
            registered: false,
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.io.raw_fd()
    }

    /// Bytes still held by the write queue awaiting completion. Per the
    /// design's open question this counts only bytes this library still
    /// holds, not bytes already handed to the kernel; it decreases
    /// monotonically as writes complete, reaching zero once the queue
    /// drains.
    pub fn write_queue_size(&self) -> usize {
        self.write_queue_bytes
    }
}

impl Loop {
    fn with_stream<R>(&self, handle: HandleId, f: impl FnOnce(&mut StreamState) -> R) -> Result<R> {
        let mut inner = self.inner.borrow_mut();
        let rec = inner.registry.get_mut(handle).ok_or(Error::InvalidArgument)?;
        let state = match &mut rec.kind {
            crate::handle::HandleKind::Tcp(s) | crate::handle::HandleKind::Pipe(s) => s,
            _ => return Err(Error::InvalidArgument),
        };
        Ok(f(state))
    }

    fn sync_poller_interest(&self, handle: HandleId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let (fd, readable, writable, registered) = {
            let rec = inner.registry.get(handle).ok_or(Error::InvalidArgument)?;
            let state = match &rec.kind {
                crate::handle::HandleKind::Tcp(s) | crate::handle::HandleKind::Pipe(s) => s,
                _ => return Err(Error::InvalidArgument),
            };
            let readable = state.read_state == ReadState::Reading;
            let writable = !state.write_queue.is_empty() || state.write_state == WriteState::Shutting;
            (state.raw_fd(), readable, writable, state.registered)
        };
        let interest = Interest { readable, writable };
        if !registered {
            inner.poller.add(fd, handle, interest).map_err(|_| Error::Invariant("poller add failed"))?;
        } else {
            inner.poller.modify(fd, handle, interest).map_err(|_| Error::Invariant("poller modify failed"))?;
        }
        if let crate::handle::HandleKind::Tcp(s) | crate::handle::HandleKind::Pipe(s) =
            &mut inner.registry.get_mut(handle).unwrap().kind
        {
            s.registered = true;
        }
        Ok(())
    }

    /// Arm readable interest and begin delivering reads. `alloc_cb` supplies
    /// the buffer for each delivery; `read_cb` receives the outcome.
    pub fn read_start(
        &self,
        handle: HandleId,
        alloc_cb: impl FnMut(usize) -> Vec<u8> + 'static,
        read_cb: impl FnMut(ReadResult<'_>) + 'static,
    ) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "read_start", handle);
        self.with_stream(handle, |s| {
            s.read_state = ReadState::Reading;
            s.alloc_cb = Some(Box::new(alloc_cb));
            s.read_cb = Some(Box::new(read_cb));
        })?;
        self.inner.borrow_mut().registry.start(handle)?;
        self.sync_poller_interest(handle)
    }

    /// Clear readable interest. Idempotent.
    pub fn read_stop(&self, handle: HandleId) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "read_stop", handle);
        self.with_stream(handle, |s| {
            s.read_state = ReadState::Stopped;
        })?;
        self.sync_poller_interest(handle)
    }

    /// Attempt an immediate non-blocking write of `data`; enqueue whatever
    /// isn't written and arm writable interest. A zero-length write
    /// completes synchronously without touching the OS.
    pub fn write(&self, handle: HandleId, data: Vec<u8>, callback: impl FnOnce(Result<()>) + 'static) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "write", handle, len = data.len());
        if data.is_empty() {
            callback(Ok(()));
            return Ok(());
        }
        // Validate before counting the request, so a rejected write never
        // leaves `active_requests` incremented with no matching completion.
        let attempt = self.with_stream(handle, |s| -> Result<Option<(Vec<u8>, usize)>> {
            if s.write_state != WriteState::Writable {
                return Err(Error::NotConnected);
            }
            match s.io.try_write(&data) {
                Ok(n) if n == data.len() => Ok(None),
                Ok(n) => Ok(Some((data, n))),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Some((data, 0))),
                Err(_) => Err(Error::NotConnected),
            }
        })?;
        self.inner.borrow_mut().requests.begin(crate::request::RequestKind::Write);
        match attempt {
            Err(e) => {
                let _ = self.inner.borrow_mut().requests.finish();
                callback(Err(e));
            }
            Ok(None) => {
                let _ = self.inner.borrow_mut().requests.finish();
                callback(Ok(()));
            }
            Ok(Some((buf, offset))) => {
                self.with_stream(handle, |s| {
                    s.write_queue_bytes += buf.len() - offset;
                    s.write_queue.push_back(WriteRequest {
                        buf,
                        offset,
                        callback: Some(Box::new(callback)),
                    });
                })?;
                self.sync_poller_interest(handle)?;
            }
        }
        Ok(())
    }

    /// A single non-blocking write attempt with no queueing.
    pub fn try_write(&self, handle: HandleId, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.with_stream(handle, |s| match s.io.try_write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::WouldBlock),
            Err(_) => Err(Error::NotConnected),
        })?
    }

    /// Current write queue depth, in bytes still held by this library.
    pub fn write_queue_size(&self, handle: HandleId) -> Result<usize> {
        self.with_stream(handle, |s| s.write_queue_size())
    }

    /// After the write queue fully drains, half-close the write side.
    pub fn shutdown(&self, handle: HandleId, callback: impl FnOnce(Result<()>) + 'static) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "shutdown", handle);
        let already_shut = self.with_stream(handle, |s| s.write_state != WriteState::Writable)?;
        if already_shut {
            callback(Err(Error::NotConnected));
            return Ok(());
        }
        self.inner.borrow_mut().requests.begin(crate::request::RequestKind::Shutdown);
        let queue_empty = self.with_stream(handle, |s| {
            s.write_state = WriteState::Shutting;
            s.shutdown_cb = Some(Box::new(callback));
            s.write_queue.is_empty()
        })?;
        if queue_empty {
            self.finish_shutdown(handle)?;
        } else {
            self.sync_poller_interest(handle)?;
        }
        Ok(())
    }

    fn finish_shutdown(&self, handle: HandleId) -> Result<()> {
        let (res, cb) = self.with_stream(handle, |s| {
            let res = s.io.shutdown_write();
            s.write_state = WriteState::Shut;
            (res, s.shutdown_cb.take())
        })?;
        let _ = self.inner.borrow_mut().requests.finish();
        if let Some(cb) = cb {
            cb(res.map_err(|_| Error::NotConnected));
        }
        Ok(())
    }

    /// Dispatch a readiness event for a stream handle.
    pub(crate) fn stream_dispatch(&self, handle: HandleId, readable: bool, writable: bool) {
        if readable {
            self.dispatch_readable(handle);
        }
        if writable {
            self.dispatch_writable(handle);
        }
    }

    fn dispatch_readable(&self, handle: HandleId) {
        let suggested = 64 * 1024;
        let mut alloc_cb = match self.with_stream(handle, |s| s.alloc_cb.take()) {
            Ok(Some(cb)) => cb,
            _ => return,
        };
        let mut buf = alloc_cb(suggested);
        let outcome = if buf.is_empty() {
            None
        } else {
            Some(self.with_stream(handle, |s| s.io.try_read(&mut buf)))
        };
        let mut read_cb = match self.with_stream(handle, |s| {
            s.alloc_cb = Some(alloc_cb);
            s.read_cb.take()
        }) {
            Ok(Some(cb)) => cb,
            _ => return,
        };
        match outcome {
            None => read_cb(ReadResult::Error(Error::InvalidArgument)),
            Some(Ok(0)) => read_cb(ReadResult::Eof),
            Some(Ok(n)) => read_cb(ReadResult::Data(&buf[..n])),
            Some(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => read_cb(ReadResult::Pending),
            Some(Err(_)) => read_cb(ReadResult::Error(Error::NotConnected)),
        }
        let _ = self.with_stream(handle, |s| {
            if s.read_cb.is_none() {
                s.read_cb = Some(read_cb);
            }
        });
        let _ = self.sync_poller_interest(handle);
    }

    fn dispatch_writable(&self, handle: HandleId) {
        loop {
            let front = match self.with_stream(handle, |s| {
                s.write_queue.front().map(|r| (r.offset, r.buf.len()))
            }) {
                Ok(Some(v)) => v,
                _ => break,
            };
            let (offset, len) = front;
            let write_res = self.with_stream(handle, |s| {
                let req = s.write_queue.front().unwrap();
                s.io.try_write(&req.buf[offset..])
            });
            match write_res {
                Ok(n) => {
                    let done = offset + n >= len;
                    let _ = self.with_stream(handle, |s| {
                        s.write_queue_bytes = s.write_queue_bytes.saturating_sub(n);
                        if let Some(req) = s.write_queue.front_mut() {
                            req.offset += n;
                        }
                    });
                    if done {
                        let cb = self.with_stream(handle, |s| {
                            s.write_queue.pop_front().and_then(|mut r| r.callback.take())
                        });
                        let _ = self.inner.borrow_mut().requests.finish();
                        if let Ok(Some(cb)) = cb {
                            cb(Ok(()));
                        }
                    } else {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    let cb = self.with_stream(handle, |s| {
                        s.write_queue.pop_front().and_then(|mut r| r.callback.take())
                    });
                    let _ = self.inner.borrow_mut().requests.finish();
                    if let Ok(Some(cb)) = cb {
                        cb(Err(Error::NotConnected));
                    }
                }
            }
        }
        let (queue_empty, shutting) = self
            .with_stream(handle, |s| (s.write_queue.is_empty(), s.write_state == WriteState::Shutting))
            .unwrap_or((true, false));
        if queue_empty && shutting {
            let _ = self.finish_shutdown(handle);
        }
        let _ = self.sync_poller_interest(handle);
    }

    /// Fail every queued write with `Cancelled`, in submission order, as the
    /// first step of closing a stream handle.
    pub(crate) fn stream_flush_cancelled(&self, handle: HandleId) {
        loop {
            let cb = self.with_stream(handle, |s| s.write_queue.pop_front().and_then(|mut r| r.callback.take()));
            match cb {
                Ok(Some(cb)) => {
                    let _ = self.inner.borrow_mut().requests.finish();
                    cb(Err(Error::Cancelled));
                }
                _ => break,
            }
        }
        let _ = self.with_stream(handle, |s| {
            s.write_state = WriteState::Closed;
            s.write_queue_bytes = 0;
        });
    }
}
