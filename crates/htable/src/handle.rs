//! Handle values handed out by a table.
//!
//! A handle is `base + dense_index`. It carries no reference to the table that
//! issued it; resolving it against a different table simply misses.
//!
//! # Examples
//!
//! ```
//! use htable::Handle;
//!
//! let h = Handle::new(42);
//! assert_eq!(h.as_u32(), 42);
//! assert!(!h.is_nil());
//! assert!(Handle::NIL.is_nil());
//! ```

use std::fmt;

/// An opaque 32-bit handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(u32);

impl Handle {
    /// The handle value no table ever returns.
    pub const NIL: Handle = Handle(u32::MAX);

    /// Wraps a raw handle value, e.g. one received back from a caller.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks whether this is [`Handle::NIL`].
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == u32::MAX
    }
}

impl From<u32> for Handle {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "Handle(nil)")
        } else {
            write!(f, "Handle({:#x})", self.0)
        }
    }
}
