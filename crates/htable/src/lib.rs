//! `htable`: paged handle tables
//!
//! A handle table hands out small dense integers in place of raw addresses,
//! so a subsystem can expose internal objects without leaking pointers. It
//! provides:
//!
//! - **Paged storage**: slots come in pages of [`PAGE_CAPACITY`], installed
//!   lazily and never moved, behind a two-level index
//! - **Intrusive free list**: free slots link to each other through the same
//!   word that holds a live payload pointer
//! - **Lock-free allocation path**: memory is never allocated while the
//!   table lock is held, and concurrent growth is resolved optimistically
//! - **Retain hook**: a caller-supplied closure can veto or refcount every
//!   lookup and free, which is how safe concurrent teardown is built
//!
//! # Architecture
//!
//! - **Entry store** ([`page`], `slot`): pages of tagged two-word slots
//! - **Lookup index** ([`index`]): inline for small tables, growable otherwise
//! - **Controller** ([`table`]): create, alloc, lookup, free, destroy
//! - **Locking** ([`lock`]): none, mutex, or spin
//!
//! # Example
//!
//! ```rust
//! use htable::{HandleTable, TableConfig, TableFlags};
//! use std::ptr::NonNull;
//!
//! let table = TableConfig::<u32>::new()
//!     .flags(TableFlags::LOCKED | TableFlags::CONTEXT)
//!     .max_count(128)
//!     .build()
//!     .unwrap();
//!
//! let mut object = 5u32;
//! let handle = table.alloc_with_ctx(NonNull::from(&mut object), 42).unwrap();
//!
//! assert!(table.lookup_with_ctx(handle, 42).is_ok());
//! assert!(table.lookup_with_ctx(handle, 7).is_err());
//!
//! let mut seen = Vec::new();
//! table.destroy_with(|h, _, ctx| seen.push((h, ctx))).unwrap();
//! assert_eq!(seen, vec![(handle, 42)]);
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod index;
pub mod lock;
pub mod page;
mod slot;
pub mod table;

// Re-export commonly used types
pub use config::{
    DEFAULT_BASE, DEFAULT_MAX_COUNT, MAX_SLOTS, RetainFn, TableConfig, TableFlags,
    effective_capacity,
};
pub use error::{Error, Result};
pub use handle::Handle;
pub use index::{EMBEDDED_PAGES, LEVEL1_GROW_STEP};
pub use lock::LockMode;
pub use page::PAGE_CAPACITY;
pub use slot::NIL_INDEX;
pub use table::{HandleTable, TableStats};
