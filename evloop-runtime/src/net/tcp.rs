//! TCP listener and connected-socket support.

use std::net::{SocketAddr, TcpListener, TcpStream};

use evloop_driver::{Interest, RawFd};
use evloop_log::instrument;
use socket2::{Domain, Socket, Type};

use crate::{
    error::{Error, Result},
    handle::{HandleId, HandleKind},
    loop_core::Loop,
    stream::{RawStream, StreamState},
};

/// Transport for a connected TCP socket.
struct TcpIo {
    stream: TcpStream,
}

impl RawStream for TcpIo {
    fn raw_fd(&self) -> RawFd {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            self.stream.as_raw_fd()
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            self.stream.as_raw_socket()
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::io::Read;
        self.stream.read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        use std::io::Write;
        self.stream.write(buf)
    }

    fn shutdown_write(&mut self) -> std::io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Write)
    }
}

/// State for a bound, listening (pre-accept) TCP socket.
pub struct ListenerState {
    listener: TcpListener,
    accept_cb: Option<Box<dyn FnMut(Result<HandleId>)>>,
    registered: bool,
}

impl ListenerState {
    pub(crate) fn raw_fd(&self) -> RawFd {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            self.listener.as_raw_fd()
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            self.listener.as_raw_socket()
        }
    }
}

impl Loop {
    /// The address the listener is bound to, as assigned by the OS (useful
    /// after binding to port 0).
    pub fn tcp_getsockname(&self, handle: HandleId) -> Result<SocketAddr> {
        let inner = self.inner.borrow();
        match &inner.registry.get(handle).ok_or(Error::InvalidArgument)?.kind {
            HandleKind::TcpListener(state) => state.listener.local_addr().map_err(|_| Error::Invariant("getsockname failed")),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Bind a listening socket. Connections are not accepted until
    /// [`Loop::tcp_listen`] arms the handle.
    pub fn tcp_bind(&self, addr: SocketAddr) -> Result<HandleId> {
        instrument!(evloop_log::Level::TRACE, "tcp_bind", ?addr);
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None).map_err(map_bind_err)?;
        socket.set_reuse_address(true).map_err(map_bind_err)?;
        socket.bind(&addr.into()).map_err(map_bind_err)?;
        socket.listen(1024).map_err(map_bind_err)?;
        socket.set_nonblocking(true).map_err(map_bind_err)?;
        let listener: TcpListener = socket.into();
        let id = self.inner.borrow_mut().registry.init(HandleKind::TcpListener(ListenerState {
            listener,
            accept_cb: None,
            registered: false,
        }));
        Ok(id)
    }

    /// Arm the listener: `backlog` is accepted by this signature for
    /// interface parity but the OS backlog was already fixed at bind time;
    /// `on_connection` fires once per accepted connection with the new
    /// stream's handle.
    pub fn tcp_listen(&self, handle: HandleId, _backlog: i32, on_connection: impl FnMut(Result<HandleId>) + 'static) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "tcp_listen", handle);
        {
            let mut inner = self.inner.borrow_mut();
            let rec = inner.registry.get_mut(handle).ok_or(Error::InvalidArgument)?;
            match &mut rec.kind {
                HandleKind::TcpListener(state) => state.accept_cb = Some(Box::new(on_connection)),
                _ => return Err(Error::InvalidArgument),
            }
        }
        self.inner.borrow_mut().registry.start(handle)?;
        let (fd, registered) = {
            let inner = self.inner.borrow();
            match &inner.registry.get(handle).unwrap().kind {
                HandleKind::TcpListener(state) => (state.raw_fd(), state.registered),
                _ => unreachable!(),
            }
        };
        let mut inner = self.inner.borrow_mut();
        if !registered {
            inner
                .poller
                .add(fd, handle, Interest::READABLE)
                .map_err(|_| Error::Invariant("poller add failed"))?;
            if let HandleKind::TcpListener(state) = &mut inner.registry.get_mut(handle).unwrap().kind {
                state.registered = true;
            }
        }
        Ok(())
    }

    /// Connect to `addr`, blocking this call until the OS either completes
    /// or rejects the connection (no async connect phase; see the design
    /// notes for why this crate takes the simpler synchronous path here).
    pub fn tcp_connect(&self, addr: SocketAddr) -> Result<HandleId> {
        instrument!(evloop_log::Level::TRACE, "tcp_connect", ?addr);
        let stream = TcpStream::connect(addr).map_err(|_| Error::NotConnected)?;
        stream.set_nonblocking(true).map_err(|_| Error::Invariant("set_nonblocking failed"))?;
        let state = StreamState::new(Box::new(TcpIo { stream }));
        Ok(self.inner.borrow_mut().registry.init(HandleKind::Tcp(state)))
    }

    /// Dispatch a listener readiness event: accept every connection
    /// currently queued, non-blocking.
    pub(crate) fn tcp_listener_dispatch(&self, handle: HandleId) {
        loop {
            let accepted = {
                let inner = self.inner.borrow();
                match &inner.registry.get(handle).map(|r| &r.kind) {
                    Some(HandleKind::TcpListener(state)) => state.listener.accept(),
                    _ => return,
                }
            };
            match accepted {
                Ok((stream, _peer)) => {
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let new_handle = self
                        .inner
                        .borrow_mut()
                        .registry
                        .init(HandleKind::Tcp(StreamState::new(Box::new(TcpIo { stream }))));
                    let cb = {
                        let mut inner = self.inner.borrow_mut();
                        match &mut inner.registry.get_mut(handle).unwrap().kind {
                            HandleKind::TcpListener(state) => state.accept_cb.take(),
                            _ => None,
                        }
                    };
                    if let Some(mut cb) = cb {
                        cb(Ok(new_handle));
                        let mut inner = self.inner.borrow_mut();
                        if let HandleKind::TcpListener(state) = &mut inner.registry.get_mut(handle).unwrap().kind {
                            if state.accept_cb.is_none() {
                                state.accept_cb = Some(cb);
                            }
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        // The poller delivers readiness one-shot; re-arm so a connection
        // arriving after this drain still wakes the loop.
        let mut inner = self.inner.borrow_mut();
        let fd = match &inner.registry.get(handle).map(|r| &r.kind) {
            Some(HandleKind::TcpListener(state)) => state.raw_fd(),
            _ => return,
        };
        let _ = inner.poller.modify(fd, handle, Interest::READABLE);
    }
}

fn map_bind_err(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::OutOfMemory {
        return Error::OutOfMemory;
    }
    #[cfg(unix)]
    {
        if matches!(e.raw_os_error(), Some(errno) if errno == libc::EMFILE || errno == libc::ENFILE) {
            return Error::TooManyOpenFiles;
        }
    }
    match e.kind() {
        std::io::ErrorKind::AddrInUse => Error::AlreadyInUse,
        _ => Error::InvalidArgument,
    }
}
