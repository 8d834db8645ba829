//! Error types for handle table operations.
//!
//! Every operation reports failure as a plain status to its immediate caller.
//! The variants deliberately carry no payload: a rejected handle looks the
//! same whether it was never allocated, already freed, or vetoed by the retain
//! callback.

use std::fmt;

/// Errors returned by [`HandleTable`](crate::HandleTable) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// A parameter was rejected: conflicting lock flags, unknown flag bits,
    /// a zero maximum, a handle range overflowing `u32`, or a payload
    /// pointer with either of its two low bits set.
    InvalidArgument,

    /// Allocating a page or growing the lookup index failed.
    ///
    /// The table is left consistent and the caller may retry later.
    OutOfMemory,

    /// Every slot up to the configured maximum is in use.
    NoMoreHandles,

    /// The handle is out of range, not allocated, registered with another
    /// context, or was rejected by the retain callback.
    NotFound,

    /// The table itself is no longer usable because it has been destroyed.
    InvalidHandle,

    /// A context operation was used on a table created without
    /// [`TableFlags::CONTEXT`](crate::TableFlags::CONTEXT), or a plain
    /// operation on a table created with it.
    InvalidFunction,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::NoMoreHandles => write!(f, "No more handles available"),
            Error::NotFound => write!(f, "Handle not found"),
            Error::InvalidHandle => {
                write!(f, "Invalid handle table (already destroyed)")
            }
            Error::InvalidFunction => {
                write!(f, "Operation does not match the table's context mode")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for handle table operations.
pub type Result<T> = std::result::Result<T, Error>;
