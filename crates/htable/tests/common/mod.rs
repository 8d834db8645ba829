// Common test utilities for integration tests
//
// Payload pointers in these tests are fabricated addresses that the table
// never dereferences; objects with real state use `TrackedObject`.

#![allow(dead_code)]

use htable::{Handle, HandleTable, TableConfig, TableFlags};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Returns a distinct, 8-byte aligned fake payload for `i`.
pub fn fake_payload(i: usize) -> NonNull<u64> {
    NonNull::new(ptr::without_provenance_mut((i + 1) << 3)).expect("non-null payload")
}

/// Recovers the `i` passed to [`fake_payload`].
pub fn payload_id(payload: NonNull<u64>) -> usize {
    (payload.as_ptr().addr() >> 3) - 1
}

/// Creates a table with the given flags, base 1 and `max_count` handles.
pub fn create_table(flags: TableFlags, max_count: u32) -> HandleTable<u64> {
    TableConfig::new()
        .flags(flags)
        .max_count(max_count)
        .build()
        .expect("Failed to create test table")
}

/// Allocates `count` fake payloads, returning their handles in order.
pub fn fill(table: &HandleTable<u64>, count: usize) -> Vec<Handle> {
    (0..count)
        .map(|i| table.alloc(fake_payload(i)).expect("Failed to allocate"))
        .collect()
}

/// Honours `HTABLE_LOG` so a failing test can be rerun with logging.
pub fn init_logging() {
    let _ = htable_log::init_from_env();
}

/// An object with a reference count and a liveness flag, as a retain hook
/// would see it during teardown.
#[derive(Debug)]
pub struct TrackedObject {
    pub id: usize,
    pub refs: AtomicUsize,
    pub alive: AtomicBool,
}

impl TrackedObject {
    pub fn new(id: usize) -> Box<Self> {
        Box::new(Self {
            id,
            refs: AtomicUsize::new(1),
            alive: AtomicBool::new(true),
        })
    }

    /// Retain logic: take a reference unless the object is being torn down.
    pub fn try_retain(&self) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        self.refs.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_payload_round_trip() {
        for i in [0, 1, 2047, 1 << 20] {
            let payload = fake_payload(i);
            assert_eq!(payload.as_ptr().addr() & 0b11, 0);
            assert_eq!(payload_id(payload), i);
        }
    }

    #[test]
    fn test_tracked_object_retain() {
        let object = TrackedObject::new(1);
        assert!(object.try_retain());
        assert_eq!(object.ref_count(), 2);

        object.alive.store(false, Ordering::Release);
        assert!(!object.try_retain());
        assert_eq!(object.ref_count(), 2);
    }
}
