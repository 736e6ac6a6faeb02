//! The closed set of error kinds the core can raise.
//!
//! Every fallible operation reports through this type (wrapped in an
//! [`std::io::Error`] via [`Error::into_io`]) or through a callback's status
//! parameter. Nothing in this crate aborts the process on a recoverable
//! failure; [`Error::Invariant`] is the one sanctioned exception, reserved
//! for the caller violating a documented precondition (e.g. freeing a handle
//! that is still active), which is a programming bug rather than a runtime
//! condition.
use std::{fmt, io};

/// A closed enum of the error categories the event loop and its handles can
/// produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The process is out of memory.
    OutOfMemory,
    /// Too many open file descriptors.
    TooManyOpenFiles,
    /// Too many handles registered on this loop.
    TooManyHandles,
    /// A required argument was missing, zero-length, or otherwise invalid.
    InvalidArgument,
    /// The handle is not in a state that supports this operation (e.g. not
    /// connected, already shut down).
    NotConnected,
    /// The resource already exists or is already in use (bind collision,
    /// `start` on an already-armed handle).
    AlreadyInUse,
    /// End of file. Delivered to read callbacks, not a request failure.
    Eof,
    /// The request was explicitly cancelled, or its handle was closed while
    /// the request was outstanding.
    Cancelled,
    /// A user-configured timeout fired. Never spontaneous.
    TimedOut,
    /// A non-blocking operation could not complete immediately.
    WouldBlock,
    /// The caller violated one of this library's own invariants. The only
    /// error variant that may legitimately reach an abort.
    Invariant(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::TooManyOpenFiles => write!(f, "too many open files"),
            Error::TooManyHandles => write!(f, "too many handles"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::NotConnected => write!(f, "not connected"),
            Error::AlreadyInUse => write!(f, "already in use"),
            Error::Eof => write!(f, "end of file"),
            Error::Cancelled => write!(f, "cancelled"),
            Error::TimedOut => write!(f, "timed out"),
            Error::WouldBlock => write!(f, "would block"),
            Error::Invariant(msg) => write!(f, "invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// The [`io::ErrorKind`] this error most closely corresponds to, for
    /// interop with code that matches on kind.
    pub fn kind(self) -> io::ErrorKind {
        match self {
            Error::OutOfMemory => io::ErrorKind::OutOfMemory,
            Error::TooManyOpenFiles | Error::TooManyHandles => io::ErrorKind::Other,
            Error::InvalidArgument => io::ErrorKind::InvalidInput,
            Error::NotConnected => io::ErrorKind::NotConnected,
            Error::AlreadyInUse => io::ErrorKind::AlreadyExists,
            Error::Eof => io::ErrorKind::UnexpectedEof,
            Error::Cancelled => io::ErrorKind::Interrupted,
            Error::TimedOut => io::ErrorKind::TimedOut,
            Error::WouldBlock => io::ErrorKind::WouldBlock,
            Error::Invariant(_) => io::ErrorKind::Other,
        }
    }

    /// Wrap this error as an [`io::Error`] carrying the original [`Error`] as
    /// its source, so callers that want the closed enum back can downcast.
    pub fn into_io(self) -> io::Error {
        io::Error::new(self.kind(), self)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        e.into_io()
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
