use std::{io, sync::Arc};

/// A handle that wakes a blocked [`Poller::wait`](crate::Poller::wait) from
/// any thread.
///
/// This is the sole mechanism by which another thread may reach into a
/// single-threaded loop: it performs one OS-level wakeup of the backend and
/// nothing else. Cloning is cheap; every clone wakes the same backend.
#[derive(Clone)]
pub struct NotifyHandle {
    inner: Arc<polling::Poller>,
}

impl NotifyHandle {
    pub(crate) fn new(inner: Arc<polling::Poller>) -> Self {
        Self { inner }
    }

    /// Interrupt a blocked or future `wait` call on the owning backend.
    pub fn notify(&self) -> io::Result<()> {
        self.inner.notify()
    }
}

impl std::fmt::Debug for NotifyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyHandle").finish_non_exhaustive()
    }
}
