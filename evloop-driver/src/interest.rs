/// The readiness a registrant wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    /// Wake when the fd becomes readable (or, for a listener, acceptable).
    pub readable: bool,
    /// Wake when the fd becomes writable.
    pub writable: bool,
}

impl Interest {
    /// Interested in neither direction. Used to temporarily park a
    /// registration without removing it from the backend.
    pub const NONE: Self = Self {
        readable: false,
        writable: false,
    };

    /// Interested in readability only.
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };

    /// Interested in writability only.
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };

    /// Interested in both directions.
    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
    };

    /// Whether this interest asks for nothing at all.
    pub fn is_empty(self) -> bool {
        !self.readable && !self.writable
    }

    /// Union of two interests.
    pub fn merge(self, other: Self) -> Self {
        Self {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
        }
    }
}
