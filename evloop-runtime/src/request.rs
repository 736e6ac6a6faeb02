//! The request registry: tracks outstanding one-shot operations so the loop
//! knows whether it still has work to do.
//!
//! Requests are not owned by this crate — their storage (the `Request`
//! value itself) lives wherever the caller put it; the registry only tracks
//! a count. Every outstanding request increments the loop's active-request
//! count; completion decrements it.

use crate::error::{Error, Result};

/// The operation kind a request represents. Stream/work callers don't
/// consult this directly; it exists for completeness and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Connect,
    Write,
    Shutdown,
    UdpSend,
    Fs,
    Work,
    GetAddrInfo,
    GetNameInfo,
}

/// Tracks the number of in-flight requests across the whole loop.
#[derive(Default)]
pub struct RequestRegistry {
    active: usize,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_requests(&self) -> usize {
        self.active
    }

    /// Call when a request is created/submitted.
    pub fn begin(&mut self, _kind: RequestKind) {
        self.active += 1;
    }

    /// Call exactly once when a request's completion callback has been
    /// invoked (or is about to be, depending on call site convention — this
    /// crate calls it immediately before invoking the callback).
    pub fn finish(&mut self) -> Result<()> {
        if self.active == 0 {
            return Err(Error::Invariant("request_unregister with active_requests == 0"));
        }
        self.active -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_finish_balance() {
        let mut reg = RequestRegistry::new();
        reg.begin(RequestKind::Work);
        reg.begin(RequestKind::Write);
        assert_eq!(reg.active_requests(), 2);
        reg.finish().unwrap();
        assert_eq!(reg.active_requests(), 1);
        reg.finish().unwrap();
        assert_eq!(reg.active_requests(), 0);
    }

    #[test]
    fn finish_without_begin_is_invariant_violation() {
        let mut reg = RequestRegistry::new();
        assert!(reg.finish().is_err());
    }
}
