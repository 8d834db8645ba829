//! The handle table controller.
//!
//! # Layout
//!
//! ```text
//! handle ── - base ──► dense index ──► page number  = index / PAGE_CAPACITY
//!                                 └──► page offset  = index % PAGE_CAPACITY
//!
//! LookupIndex [ page 0 ][ page 1 ] ... [ page n ]      (inline up to 16 pages)
//!                 │
//!                 ▼
//!            [ slot ][ slot ] ... 2048 slots, each live or a free-list link
//! ```
//!
//! # Growth
//!
//! When the free list runs dry, `alloc` snapshots the backed slot count,
//! drops the lock, allocates the next page (and a bigger lookup index if
//! needed), then re-takes the lock and commits only if the snapshot still
//! holds. A thread that loses the race throws its page away and retries;
//! someone else made progress, and progress is bounded by the table maximum.
//! The global allocator is never called with the lock held.
//!
//! # Examples
//!
//! ```
//! use htable::{Error, HandleTable};
//! use std::ptr::NonNull;
//!
//! let table = HandleTable::<u64>::create().unwrap();
//! let mut value = 7u64;
//! let payload = NonNull::from(&mut value);
//!
//! let handle = table.alloc(payload).unwrap();
//! assert_eq!(table.lookup(handle), Ok(payload));
//! assert_eq!(table.free(handle), Ok(payload));
//! assert_eq!(table.lookup(handle), Err(Error::NotFound));
//! ```

use std::fmt;
use std::ptr::NonNull;

use htable_log::{debug, trace, warn};

use crate::config::{RetainFn, TableConfig, TableFlags, effective_capacity};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::index::LookupIndex;
use crate::lock::{Guarded, LockMode};
use crate::page::{PAGE_CAPACITY, Page};
use crate::slot::{self, NIL_INDEX, Slot};

// ============================================================================
// Statistics
// ============================================================================

/// Point-in-time counters of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStats {
    /// Live handles.
    pub allocated: u32,
    /// Slots backed by a page.
    pub backed: u32,
    /// Maximum slot count.
    pub capacity: u32,
    /// Installed pages.
    pub pages: usize,
    /// Pages the lookup index holds before it must be replaced.
    pub level1_capacity: usize,
    /// Whether the lookup index is stored inline.
    pub embedded: bool,
    /// Committed page growths.
    pub growths: u64,
    /// Speculative growths discarded because another thread got there first.
    pub growth_races: u64,
}

// ============================================================================
// Locked state
// ============================================================================

/// Snapshot taken before growing with the lock dropped.
#[derive(Debug, Clone, Copy)]
struct GrowthPlan {
    backed: u32,
    level1_capacity: usize,
    level1_target: Option<usize>,
}

/// Result of re-validating a [`GrowthPlan`].
///
/// Both variants own memory that must be freed after the lock is released.
enum Commit<T> {
    Installed {
        pages: usize,
        retired: Option<Vec<Page<T>>>,
    },
    Raced {
        _page: Page<T>,
        _level1: Option<Vec<Page<T>>>,
    },
}

struct TableState<T> {
    alive: bool,
    backed: u32,
    allocated: u32,
    head: u32,
    tail: u32,
    index: LookupIndex<T>,
    growths: u64,
    growth_races: u64,
}

impl<T> TableState<T> {
    fn new(max_pages: usize) -> Self {
        Self {
            alive: true,
            backed: 0,
            allocated: 0,
            head: NIL_INDEX,
            tail: NIL_INDEX,
            index: LookupIndex::for_capacity(max_pages),
            growths: 0,
            growth_races: 0,
        }
    }

    #[inline]
    fn check_alive(&self) -> Result<()> {
        if self.alive {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    #[inline]
    fn slot(&self, index: u32) -> Option<&Slot<T>> {
        let index = index as usize;
        self.index
            .page(index / PAGE_CAPACITY)?
            .slots()
            .get(index % PAGE_CAPACITY)
    }

    #[inline]
    fn slot_mut(&mut self, index: u32) -> Option<&mut Slot<T>> {
        let index = index as usize;
        self.index
            .page_mut(index / PAGE_CAPACITY)?
            .slots_mut()
            .get_mut(index % PAGE_CAPACITY)
    }

    /// Payload and context of a live slot.
    #[inline]
    fn entry(&self, index: u32) -> Option<(NonNull<T>, usize)> {
        if index >= self.backed {
            return None;
        }
        self.slot(index)?.entry()
    }

    /// Pops the free-list head and stores the entry there.
    fn take_free(&mut self, payload: NonNull<T>, ctx: usize) -> Option<u32> {
        let index = self.head;
        if index == NIL_INDEX {
            return None;
        }
        let slot = self.slot_mut(index)?;
        let next = slot.next_free()?;
        slot.occupy(payload, ctx);

        self.head = next;
        if next == NIL_INDEX {
            self.tail = NIL_INDEX;
        }
        self.allocated += 1;
        Some(index)
    }

    /// Marks a live slot free and appends it to the free-list tail.
    fn release(&mut self, index: u32) {
        if let Some(slot) = self.slot_mut(index) {
            slot.set_next(NIL_INDEX);
        }
        self.append_free_run(index, index);
        self.allocated -= 1;
    }

    /// Links the already threaded run `first..=last` after the current tail.
    fn append_free_run(&mut self, first: u32, last: u32) {
        if self.tail == NIL_INDEX {
            self.head = first;
        } else {
            let tail = self.tail;
            if let Some(slot) = self.slot_mut(tail) {
                slot.set_next(first);
            }
        }
        self.tail = last;
    }

    fn plan_growth(&self, max_pages: usize) -> GrowthPlan {
        GrowthPlan {
            backed: self.backed,
            level1_capacity: self.index.capacity(),
            level1_target: self.index.growth_target(max_pages),
        }
    }

    /// Installs a speculatively allocated page if `plan` is still current.
    ///
    /// Only slots below `limit` join the free list; the rest of a final
    /// partial page stays unreachable.
    fn commit(
        &mut self,
        plan: GrowthPlan,
        page: Page<T>,
        level1: Option<Vec<Page<T>>>,
        limit: u32,
    ) -> Commit<T> {
        if self.backed != plan.backed || self.index.capacity() != plan.level1_capacity {
            self.growth_races += 1;
            return Commit::Raced {
                _page: page,
                _level1: level1,
            };
        }

        let retired = self.index.install(page, level1);
        let first = self.backed;
        let last = (first + PAGE_CAPACITY as u32).min(limit) - 1;
        if last < first + PAGE_CAPACITY as u32 - 1 {
            if let Some(slot) = self.slot_mut(last) {
                slot.set_next(NIL_INDEX);
            }
        }
        self.append_free_run(first, last);
        self.backed += PAGE_CAPACITY as u32;
        self.growths += 1;

        Commit::Installed {
            pages: self.index.len(),
            retired,
        }
    }

    /// Marks the state dead and hands out everything it owns.
    fn tear_down(&mut self) -> (Vec<Page<T>>, u32) {
        self.alive = false;
        let pages = self.index.take_pages();
        let live = self.allocated;
        self.backed = 0;
        self.allocated = 0;
        self.head = NIL_INDEX;
        self.tail = NIL_INDEX;
        (pages, live)
    }
}

// ============================================================================
// Handle Table
// ============================================================================

/// A table mapping [`Handle`]s to payload pointers.
///
/// The table stores addresses only and never dereferences a payload; keeping
/// the pointee alive while its handle is live is the caller's business. Every
/// operation takes `&self`; sharing across threads is serialized by the lock
/// selected at creation.
pub struct HandleTable<T> {
    base: u32,
    max: u32,
    flags: TableFlags,
    state: Guarded<TableState<T>>,
    retain: Option<Box<RetainFn<T>>>,
}

impl<T> HandleTable<T> {
    /// Creates a locked table with base 1 and room for at least 65534 handles.
    ///
    /// # Errors
    ///
    /// Never fails with the default parameters; the `Result` mirrors
    /// [`HandleTable::create_ex`].
    pub fn create() -> Result<Self> {
        TableConfig::new().build()
    }

    /// Creates a table.
    ///
    /// `max_count` is rounded up to a whole number of pages, unless that would
    /// run past the end of the handle space; see [`effective_capacity`]. The
    /// retain hook, if any, runs under the lock on every lookup and free.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for conflicting or unknown flags, a zero
    /// maximum, or `base + max_count` overflowing `u32`.
    pub fn create_ex(
        flags: TableFlags,
        base: u32,
        max_count: u32,
        retain: Option<Box<RetainFn<T>>>,
    ) -> Result<Self> {
        Self::from_config(TableConfig {
            flags,
            base,
            max_count,
            retain,
        })
    }

    pub(crate) fn from_config(config: TableConfig<T>) -> Result<Self> {
        let mode = config.flags.lock_mode()?;
        let max = effective_capacity(config.base, config.max_count)?;
        let state = TableState::new(max.div_ceil(PAGE_CAPACITY as u32) as usize);

        debug!(
            "created handle table: base={:#x} max={} lock={:?} context={} embedded={}",
            config.base,
            max,
            mode,
            config.flags.contains(TableFlags::CONTEXT),
            state.index.is_embedded()
        );

        Ok(Self {
            base: config.base,
            max,
            flags: config.flags,
            state: Guarded::new(mode, state),
            retain: config.retain,
        })
    }

    /// Value of the first handle.
    #[must_use]
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Maximum number of live handles.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.max
    }

    /// Creation flags.
    #[must_use]
    pub fn flags(&self) -> TableFlags {
        self.flags
    }

    /// How access is serialized.
    #[must_use]
    pub fn lock_mode(&self) -> LockMode {
        self.state.mode()
    }

    /// Whether entries carry a context word that must be matched.
    #[must_use]
    pub fn has_context(&self) -> bool {
        self.flags.contains(TableFlags::CONTEXT)
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().allocated as usize
    }

    /// Whether no handle is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters. A destroyed table reports zeros.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        let state = self.state.read();
        TableStats {
            allocated: state.allocated,
            backed: state.backed,
            capacity: self.max,
            pages: state.index.len(),
            level1_capacity: state.index.capacity(),
            embedded: state.index.is_embedded(),
            growths: state.growths,
            growth_races: state.growth_races,
        }
    }

    // ------------------------------------------------------------------------
    // Alloc
    // ------------------------------------------------------------------------

    /// Registers `payload` and returns its handle.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if either low bit of `payload` is set
    /// - [`Error::NoMoreHandles`] if the table is full
    /// - [`Error::OutOfMemory`] if a new page could not be allocated
    /// - [`Error::InvalidFunction`] on a context table
    /// - [`Error::InvalidHandle`] after [`destroy`](Self::destroy)
    pub fn alloc(&self, payload: NonNull<T>) -> Result<Handle> {
        self.expect_context(false)?;
        self.alloc_entry(payload, 0)
    }

    /// Registers `payload` with a context word on a context table.
    ///
    /// # Errors
    ///
    /// As [`alloc`](Self::alloc), with [`Error::InvalidFunction`] on a table
    /// created without [`TableFlags::CONTEXT`].
    pub fn alloc_with_ctx(&self, payload: NonNull<T>, ctx: usize) -> Result<Handle> {
        self.expect_context(true)?;
        self.alloc_entry(payload, ctx)
    }

    fn alloc_entry(&self, payload: NonNull<T>, ctx: usize) -> Result<Handle> {
        if !slot::is_storable(payload) {
            return Err(Error::InvalidArgument);
        }

        loop {
            let plan = {
                let mut state = self.state.lock();
                state.check_alive()?;

                if let Some(index) = state.take_free(payload, ctx) {
                    return Ok(Handle::new(self.base + index));
                }
                if state.backed >= self.max {
                    return Err(Error::NoMoreHandles);
                }
                state.plan_growth(self.max_pages())
            };

            self.grow(plan)?;
        }
    }

    /// Allocates outside the lock and commits under it.
    #[cold]
    fn grow(&self, plan: GrowthPlan) -> Result<()> {
        let page = Page::with_free_run(plan.backed).inspect_err(|_| {
            warn!("failed to allocate page for slots from {}", plan.backed);
        })?;
        let level1 = match plan.level1_target {
            Some(capacity) => Some(LookupIndex::reserve(capacity).inspect_err(|_| {
                warn!("failed to grow lookup index to {} pages", capacity);
            })?),
            None => None,
        };

        let commit = {
            let mut state = self.state.lock();
            state.check_alive()?;
            state.commit(plan, page, level1, self.max)
        };

        match &commit {
            Commit::Installed { pages, retired } => trace!(
                "installed page {} (slots {}..{}), index replaced: {}",
                pages - 1,
                plan.backed,
                plan.backed as usize + PAGE_CAPACITY,
                retired.is_some()
            ),
            Commit::Raced { .. } => debug!(
                "discarded page for slot {}: table grew concurrently",
                plan.backed
            ),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lookup / Free
    // ------------------------------------------------------------------------

    /// Resolves a handle to its payload.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the handle is not live or the retain hook
    ///   rejected it
    /// - [`Error::InvalidFunction`] on a context table
    /// - [`Error::InvalidHandle`] after [`destroy`](Self::destroy)
    pub fn lookup(&self, handle: Handle) -> Result<NonNull<T>> {
        self.expect_context(false)?;
        self.lookup_entry(handle, None)
    }

    /// Resolves a handle registered with context `ctx`.
    ///
    /// A live handle registered with a different context is
    /// [`Error::NotFound`].
    ///
    /// # Errors
    ///
    /// As [`lookup`](Self::lookup), with [`Error::InvalidFunction`] on a
    /// table created without [`TableFlags::CONTEXT`].
    pub fn lookup_with_ctx(&self, handle: Handle, ctx: usize) -> Result<NonNull<T>> {
        self.expect_context(true)?;
        self.lookup_entry(handle, Some(ctx))
    }

    fn lookup_entry(&self, handle: Handle, ctx: Option<usize>) -> Result<NonNull<T>> {
        let index = self.dense_index(handle);
        let state = self.state.read();
        state.check_alive()?;

        let index = index.ok_or(Error::NotFound)?;
        let (payload, _) = self.resolve(&state, index, ctx)?;
        Ok(payload)
    }

    /// Releases a handle and returns its payload.
    ///
    /// The retain hook runs first and may veto the free, leaving the entry in
    /// place. No destructor logic runs here; the caller owns the returned
    /// payload.
    ///
    /// # Errors
    ///
    /// As [`lookup`](Self::lookup).
    pub fn free(&self, handle: Handle) -> Result<NonNull<T>> {
        self.expect_context(false)?;
        self.free_entry(handle, None)
    }

    /// Releases a handle registered with context `ctx`.
    ///
    /// # Errors
    ///
    /// As [`lookup_with_ctx`](Self::lookup_with_ctx).
    pub fn free_with_ctx(&self, handle: Handle, ctx: usize) -> Result<NonNull<T>> {
        self.expect_context(true)?;
        self.free_entry(handle, Some(ctx))
    }

    fn free_entry(&self, handle: Handle, ctx: Option<usize>) -> Result<NonNull<T>> {
        let index = self.dense_index(handle);
        let mut state = self.state.lock();
        state.check_alive()?;

        let index = index.ok_or(Error::NotFound)?;
        let (payload, _) = self.resolve(&state, index, ctx)?;
        state.release(index);
        Ok(payload)
    }

    /// Common validation for lookup and free, run with the lock held.
    fn resolve(
        &self,
        state: &TableState<T>,
        index: u32,
        ctx: Option<usize>,
    ) -> Result<(NonNull<T>, usize)> {
        let (payload, stored) = state.entry(index).ok_or(Error::NotFound)?;
        if ctx.is_some_and(|ctx| ctx != stored) {
            return Err(Error::NotFound);
        }
        if self
            .retain
            .as_ref()
            .is_some_and(|retain| !retain(self, payload, stored))
        {
            return Err(Error::NotFound);
        }
        Ok((payload, stored))
    }

    // ------------------------------------------------------------------------
    // Destroy
    // ------------------------------------------------------------------------

    /// Invalidates the table and releases its memory.
    ///
    /// Every later call, including a second `destroy`, fails with
    /// [`Error::InvalidHandle`]. Live entries are dropped silently; use
    /// [`destroy_with`](Self::destroy_with) to visit them.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] if the table was already destroyed.
    pub fn destroy(&self) -> Result<()> {
        self.destroy_with(|_, _, _| {})
    }

    /// Invalidates the table, reports each live entry once, then releases
    /// the memory.
    ///
    /// `on_delete` receives `(handle, payload, context)` and runs after the
    /// lock is released. The walk stops as soon as every live entry has been
    /// reported.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] if the table was already destroyed.
    pub fn destroy_with<F>(&self, mut on_delete: F) -> Result<()>
    where
        F: FnMut(Handle, NonNull<T>, usize),
    {
        let (pages, live) = {
            let mut state = self.state.lock();
            state.check_alive()?;
            state.tear_down()
        };

        let mut remaining = live;
        'walk: for (number, page) in pages.iter().enumerate() {
            for (offset, slot) in page.slots().iter().enumerate() {
                if remaining == 0 {
                    break 'walk;
                }
                if let Some((payload, ctx)) = slot.entry() {
                    let index = (number * PAGE_CAPACITY + offset) as u32;
                    on_delete(Handle::new(self.base + index), payload, ctx);
                    remaining -= 1;
                }
            }
        }

        debug!(
            "destroyed handle table: base={:#x} pages={} live entries={}",
            self.base,
            pages.len(),
            live
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    #[inline]
    fn max_pages(&self) -> usize {
        self.max.div_ceil(PAGE_CAPACITY as u32) as usize
    }

    #[inline]
    fn dense_index(&self, handle: Handle) -> Option<u32> {
        handle
            .as_u32()
            .checked_sub(self.base)
            .filter(|&index| index < self.max)
    }

    #[inline]
    fn expect_context(&self, with_ctx: bool) -> Result<()> {
        if self.has_context() == with_ctx {
            Ok(())
        } else {
            Err(Error::InvalidFunction)
        }
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("base", &self.base)
            .field("capacity", &self.max)
            .field("flags", &self.flags)
            .field("lock", &self.lock_mode())
            .field("retain", &self.retain.is_some())
            .finish_non_exhaustive()
    }
}
