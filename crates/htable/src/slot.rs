//! Slot encoding.
//!
//! A slot is two words: the payload pointer and the context word. A free slot
//! reuses the pointer word to hold the index of the next free slot:
//!
//! ```text
//! in use:  [ payload ptr (low 2 bits = 00) ][ context ]
//! free:    [ next << 2 | 0b11              ][ 0       ]
//! ```
//!
//! Registered payloads must have both low bits clear, so `0b11` can never be
//! mistaken for a live pointer. The next index is shifted by the tag width,
//! which caps indices at [`NIL_INDEX`] on every target, including 32-bit ones.

use std::ptr::{self, NonNull};

/// Number of low pointer bits reserved for the tag.
pub(crate) const TAG_BITS: u32 = 2;

/// Mask selecting the tag bits of a pointer word.
pub(crate) const TAG_MASK: usize = (1 << TAG_BITS) - 1;

/// Tag value marking a free slot.
const FREE_TAG: usize = 0b11;

/// Free-list terminator; also one past the largest encodable index.
pub const NIL_INDEX: u32 = u32::MAX >> TAG_BITS;

/// Checks that a payload can be stored without colliding with the free tag.
#[inline]
pub(crate) fn is_storable<T>(payload: NonNull<T>) -> bool {
    payload.as_ptr().addr() & TAG_MASK == 0
}

#[repr(C)]
pub(crate) struct Slot<T> {
    obj: *mut T,
    ctx: usize,
}

impl<T> Slot<T> {
    /// A free slot linking to `next`.
    #[inline]
    pub(crate) fn free(next: u32) -> Self {
        debug_assert!(next <= NIL_INDEX);
        let word = ((next as usize) << TAG_BITS) | FREE_TAG;
        Slot {
            obj: ptr::without_provenance_mut(word),
            ctx: 0,
        }
    }

    #[inline]
    pub(crate) fn is_free(&self) -> bool {
        self.obj.addr() & TAG_MASK == FREE_TAG
    }

    /// Returns the next free index, or `None` if the slot is in use.
    #[inline]
    pub(crate) fn next_free(&self) -> Option<u32> {
        if self.is_free() {
            // Lossless: the word was built from a u32 shifted left by TAG_BITS.
            Some((self.obj.addr() >> TAG_BITS) as u32)
        } else {
            None
        }
    }

    /// Returns the payload and context of an in-use slot.
    ///
    /// A zeroed slot that was never threaded onto the free list reads as
    /// neither free nor live.
    #[inline]
    pub(crate) fn entry(&self) -> Option<(NonNull<T>, usize)> {
        if self.is_free() {
            return None;
        }
        NonNull::new(self.obj).map(|payload| (payload, self.ctx))
    }

    #[inline]
    pub(crate) fn occupy(&mut self, payload: NonNull<T>, ctx: usize) {
        debug_assert!(self.is_free());
        debug_assert!(is_storable(payload));
        self.obj = payload.as_ptr();
        self.ctx = ctx;
    }

    /// Relinks a free slot, or turns an in-use slot back into a free one.
    #[inline]
    pub(crate) fn set_next(&mut self, next: u32) {
        *self = Slot::free(next);
    }
}
