//! Table creation parameters.
//!
//! [`TableFlags`] mirrors the flag word accepted by
//! [`HandleTable::create_ex`](crate::HandleTable::create_ex);
//! [`TableConfig`] is the builder form of the same parameters.
//!
//! # Examples
//!
//! ```
//! use htable::{TableConfig, TableFlags, LockMode};
//!
//! let table = TableConfig::<u64>::new()
//!     .flags(TableFlags::LOCKED_IRQ_SAFE | TableFlags::CONTEXT)
//!     .base(0x100)
//!     .max_count(4096)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(table.lock_mode(), LockMode::Spin);
//! assert!(table.has_context());
//! assert_eq!(table.base(), 0x100);
//! ```

use std::fmt;
use std::ops::BitOr;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::lock::LockMode;
use crate::page::PAGE_CAPACITY;
use crate::slot::NIL_INDEX;
use crate::table::HandleTable;

/// Base handle used by [`HandleTable::create`].
pub const DEFAULT_BASE: u32 = 1;

/// Maximum handle count requested by [`HandleTable::create`].
///
/// Page rounding turns this into 65536 usable handles.
pub const DEFAULT_MAX_COUNT: u32 = 65534;

/// Largest slot count any table can have.
///
/// Dense indices must stay below the free-list terminator, and the count is a
/// whole number of pages.
pub const MAX_SLOTS: u32 = (NIL_INDEX / PAGE_CAPACITY as u32) * PAGE_CAPACITY as u32;

/// Retain hook run under the table lock by every lookup and free.
///
/// Receives the table asking, the payload and its context word; returning
/// `false` makes the operation fail with [`Error::NotFound`]. The closure
/// runs with the lock held, so it must not block or call any locking method
/// of the table it is given. Accessors such as
/// [`base`](HandleTable::base) and [`flags`](HandleTable::flags) are fine.
pub type RetainFn<T> = dyn Fn(&HandleTable<T>, NonNull<T>, usize) -> bool + Send + Sync;

/// Creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableFlags(u32);

impl TableFlags {
    /// No lock; the caller serializes access.
    pub const NONE: Self = Self(0);
    /// Serialize with a sleeping mutex.
    pub const LOCKED: Self = Self(1 << 0);
    /// Serialize with a spin lock that never parks.
    pub const LOCKED_IRQ_SAFE: Self = Self(1 << 1);
    /// Entries carry a context word that lookups and frees must match.
    pub const CONTEXT: Self = Self(1 << 2);

    const VALID: u32 = Self::LOCKED.0 | Self::LOCKED_IRQ_SAFE.0 | Self::CONTEXT.0;

    /// Creates flags from raw bits, unknown bits included.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Union of two flag sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Checks whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Validates the flags and derives the lock mode.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for unknown bits or for both lock flags at
    /// once.
    pub fn lock_mode(self) -> Result<LockMode> {
        if self.0 & !Self::VALID != 0 {
            return Err(Error::InvalidArgument);
        }
        match (
            self.contains(Self::LOCKED),
            self.contains(Self::LOCKED_IRQ_SAFE),
        ) {
            (true, true) => Err(Error::InvalidArgument),
            (true, false) => Ok(LockMode::Mutex),
            (false, true) => Ok(LockMode::Spin),
            (false, false) => Ok(LockMode::None),
        }
    }
}

impl BitOr for TableFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Rounds a requested maximum to the slot count the table will actually use.
///
/// The request is clamped to [`MAX_SLOTS`] and rounded up to whole pages,
/// then cut back to the handles left between `base` and
/// [`Handle::NIL`](crate::Handle::NIL).
///
/// # Errors
///
/// [`Error::InvalidArgument`] if `max_count` is zero or if `base + max_count`
/// overflows a `u32`.
pub fn effective_capacity(base: u32, max_count: u32) -> Result<u32> {
    if max_count == 0 || max_count > u32::MAX - base {
        return Err(Error::InvalidArgument);
    }
    let rounded = max_count
        .min(MAX_SLOTS)
        .next_multiple_of(PAGE_CAPACITY as u32);
    Ok(rounded.min(u32::MAX - base))
}

/// Builder for [`HandleTable`].
///
/// Defaults match [`HandleTable::create`]: [`TableFlags::LOCKED`],
/// [`DEFAULT_BASE`], [`DEFAULT_MAX_COUNT`] and no retain hook.
pub struct TableConfig<T> {
    pub(crate) flags: TableFlags,
    pub(crate) base: u32,
    pub(crate) max_count: u32,
    pub(crate) retain: Option<Box<RetainFn<T>>>,
}

impl<T> TableConfig<T> {
    /// Creates a configuration with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: TableFlags::LOCKED,
            base: DEFAULT_BASE,
            max_count: DEFAULT_MAX_COUNT,
            retain: None,
        }
    }

    /// Replaces the creation flags.
    #[must_use]
    pub fn flags(mut self, flags: TableFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the value of the first handle.
    #[must_use]
    pub fn base(mut self, base: u32) -> Self {
        self.base = base;
        self
    }

    /// Sets the maximum number of live handles (rounded up to whole pages).
    #[must_use]
    pub fn max_count(mut self, max_count: u32) -> Self {
        self.max_count = max_count;
        self
    }

    /// Installs a retain hook; see [`RetainFn`].
    #[must_use]
    pub fn retain<F>(mut self, retain: F) -> Self
    where
        F: Fn(&HandleTable<T>, NonNull<T>, usize) -> bool + Send + Sync + 'static,
    {
        self.retain = Some(Box::new(retain));
        self
    }

    /// Creates the table.
    ///
    /// # Errors
    ///
    /// See [`HandleTable::create_ex`].
    pub fn build(self) -> Result<HandleTable<T>> {
        HandleTable::from_config(self)
    }
}

impl<T> Default for TableConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TableConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableConfig")
            .field("flags", &self.flags)
            .field("base", &self.base)
            .field("max_count", &self.max_count)
            .field("retain", &self.retain.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mode_from_flags() {
        assert_eq!(TableFlags::NONE.lock_mode(), Ok(LockMode::None));
        assert_eq!(TableFlags::LOCKED.lock_mode(), Ok(LockMode::Mutex));
        assert_eq!(
            (TableFlags::LOCKED_IRQ_SAFE | TableFlags::CONTEXT).lock_mode(),
            Ok(LockMode::Spin)
        );
        assert_eq!(
            (TableFlags::LOCKED | TableFlags::LOCKED_IRQ_SAFE).lock_mode(),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            TableFlags::from_bits(1 << 9).lock_mode(),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_flag_set_operations() {
        let flags = TableFlags::LOCKED | TableFlags::CONTEXT;
        assert!(flags.contains(TableFlags::CONTEXT));
        assert!(!flags.contains(TableFlags::LOCKED_IRQ_SAFE));
        assert_eq!(flags.bits(), 0b101);
    }

    #[test]
    fn test_effective_capacity_rounds_up() {
        let page = PAGE_CAPACITY as u32;
        assert_eq!(effective_capacity(1, 1), Ok(page));
        assert_eq!(effective_capacity(1, 4000), Ok(2 * page));
        assert_eq!(effective_capacity(0, 2 * page), Ok(2 * page));
        assert_eq!(effective_capacity(0, u32::MAX), Ok(MAX_SLOTS));
    }

    #[test]
    fn test_effective_capacity_rejects_bad_ranges() {
        assert_eq!(effective_capacity(1, 0), Err(Error::InvalidArgument));
        assert_eq!(
            effective_capacity(u32::MAX - 10, 11),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            effective_capacity(u32::MAX, 1),
            Err(Error::InvalidArgument)
        );
        let page = PAGE_CAPACITY as u32;
        assert_eq!(effective_capacity(u32::MAX - page, 1), Ok(page));
    }

    #[test]
    fn test_effective_capacity_clamps_to_handle_space() {
        assert_eq!(effective_capacity(u32::MAX - 10, 5), Ok(10));
        assert_eq!(effective_capacity(u32::MAX - 100, 50), Ok(100));
        assert_eq!(effective_capacity(u32::MAX - 100, 100), Ok(100));
        assert_eq!(effective_capacity(u32::MAX - 5000, 3000), Ok(5000));
    }

    #[test]
    fn test_config_defaults() {
        let config = TableConfig::<u8>::default();
        assert_eq!(config.flags, TableFlags::LOCKED);
        assert_eq!(config.base, DEFAULT_BASE);
        assert_eq!(config.max_count, DEFAULT_MAX_COUNT);
        assert!(config.retain.is_none());
        assert!(format!("{config:?}").contains("retain: false"));
    }
}
