//! Fixed-capacity slot pages.
//!
//! Pages are the unit of growth: a table acquires memory one page at a time
//! and never gives a page back before it is destroyed. Each page is a single
//! zeroed allocation from the global allocator, threaded into a run of free
//! slots before anyone else can see it.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::slot::{NIL_INDEX, Slot};

/// Number of slots per page.
///
/// Tables up to `EMBEDDED_PAGES * PAGE_CAPACITY` handles (32 Ki) need no
/// separately allocated lookup index.
pub const PAGE_CAPACITY: usize = 2048;

/// A heap page of [`PAGE_CAPACITY`] slots.
///
/// # Safety
///
/// - `slots` points to an allocation of exactly `Self::layout()`
/// - every slot is initialized before the page is handed out
/// - the allocation is released once, in `Drop`
pub(crate) struct Page<T> {
    slots: NonNull<Slot<T>>,
}

// SAFETY: a page only stores payload addresses and never dereferences them,
// so moving or sharing it between threads cannot touch a `T`.
unsafe impl<T> Send for Page<T> {}
unsafe impl<T> Sync for Page<T> {}

impl<T> Page<T> {
    fn layout() -> Result<Layout> {
        Layout::array::<Slot<T>>(PAGE_CAPACITY).map_err(|_| Error::OutOfMemory)
    }

    /// Allocates a page whose slots form one free run.
    ///
    /// Slot `i` links to `first + i + 1`; the last slot links to
    /// [`NIL_INDEX`]. `first` is the dense index the page will back.
    pub(crate) fn with_free_run(first: u32) -> Result<Self> {
        debug_assert!(first as usize + PAGE_CAPACITY <= NIL_INDEX as usize);
        let layout = Self::layout()?;

        // SAFETY: the layout is non-zero sized (PAGE_CAPACITY > 0, slots are
        // two words).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let slots = NonNull::new(raw.cast::<Slot<T>>()).ok_or(Error::OutOfMemory)?;

        for offset in 0..PAGE_CAPACITY {
            let next = if offset + 1 == PAGE_CAPACITY {
                NIL_INDEX
            } else {
                first + offset as u32 + 1
            };
            // SAFETY: offset < PAGE_CAPACITY, inside the fresh allocation.
            unsafe { slots.add(offset).write(Slot::free(next)) };
        }

        Ok(Page { slots })
    }

    #[inline]
    pub(crate) fn slots(&self) -> &[Slot<T>] {
        // SAFETY: see the type-level invariants.
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr(), PAGE_CAPACITY) }
    }

    #[inline]
    pub(crate) fn slots_mut(&mut self) -> &mut [Slot<T>] {
        // SAFETY: see the type-level invariants; `&mut self` is unique.
        unsafe { std::slice::from_raw_parts_mut(self.slots.as_ptr(), PAGE_CAPACITY) }
    }
}

impl<T> Drop for Page<T> {
    fn drop(&mut self) {
        // The layout was valid when the page was created, so this cannot fail.
        if let Ok(layout) = Self::layout() {
            // SAFETY: allocated in `with_free_run` with this exact layout.
            unsafe { alloc::dealloc(self.slots.as_ptr().cast::<u8>(), layout) };
        }
    }
}
