//! Property-based tests for the handle table.
//!
//! Random operation sequences run against a table and a hash map model; after
//! every step the two must agree.
//!
//! Run with: `cargo test --test property_test`

mod common;

use common::{fake_payload, payload_id};
use fxhash::FxHashMap;
use htable::{Error, Handle, HandleTable, MAX_SLOTS, PAGE_CAPACITY, TableConfig, TableFlags};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Alloc,
    /// Frees the n-th live handle (modulo the live count).
    Free(usize),
    /// Looks up the n-th live handle.
    Lookup(usize),
    /// Looks up an arbitrary raw handle value.
    Probe(u32),
    /// Frees an arbitrary raw handle value.
    FreeRaw(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Alloc),
        3 => any::<usize>().prop_map(Op::Free),
        2 => any::<usize>().prop_map(Op::Lookup),
        1 => (0u32..3 * PAGE_CAPACITY as u32).prop_map(Op::Probe),
        1 => any::<u32>().prop_map(Op::FreeRaw),
    ]
}

fn table_flags() -> impl Strategy<Value = TableFlags> {
    prop_oneof![
        Just(TableFlags::NONE),
        Just(TableFlags::LOCKED),
        Just(TableFlags::LOCKED_IRQ_SAFE),
    ]
}

/// Drives `ops` against a table and a model, checking agreement at each step.
fn check_against_model(table: &HandleTable<u64>, ops: &[Op]) -> Result<(), TestCaseError> {
    let mut model: FxHashMap<Handle, usize> = FxHashMap::default();
    let mut live: Vec<Handle> = Vec::new();
    let capacity = table.capacity() as usize;
    let mut next_id = 0;

    for op in ops {
        match *op {
            Op::Alloc => match table.alloc(fake_payload(next_id)) {
                Ok(handle) => {
                    prop_assert!(model.insert(handle, next_id).is_none());
                    live.push(handle);
                    next_id += 1;
                }
                Err(err) => {
                    prop_assert_eq!(err, Error::NoMoreHandles);
                    prop_assert_eq!(model.len(), capacity);
                }
            },
            Op::Free(n) if !live.is_empty() => {
                let handle = live.swap_remove(n % live.len());
                let id = model.remove(&handle);
                prop_assert_eq!(table.free(handle).map(payload_id).ok(), id);
                prop_assert_eq!(table.lookup(handle), Err(Error::NotFound));
            }
            Op::Lookup(n) if !live.is_empty() => {
                let handle = live[n % live.len()];
                prop_assert_eq!(
                    table.lookup(handle).map(payload_id).ok(),
                    model.get(&handle).copied()
                );
            }
            Op::Probe(raw) => {
                let handle = Handle::new(raw);
                match model.get(&handle) {
                    Some(&id) => {
                        prop_assert_eq!(table.lookup(handle).map(payload_id), Ok(id));
                    }
                    None => {
                        prop_assert_eq!(table.lookup(handle), Err(Error::NotFound));
                    }
                }
            }
            Op::FreeRaw(raw) => {
                let handle = Handle::new(raw);
                match model.remove(&handle) {
                    Some(id) => {
                        live.retain(|&h| h != handle);
                        prop_assert_eq!(table.free(handle).map(payload_id), Ok(id));
                    }
                    None => {
                        prop_assert_eq!(table.free(handle), Err(Error::NotFound));
                    }
                }
            }
            _ => {}
        }
        prop_assert_eq!(table.len(), model.len());
    }
    Ok(())
}

proptest! {
    /// The table agrees with a map model under arbitrary op sequences.
    #[test]
    fn table_matches_model(
        flags in table_flags(),
        base in 0u32..0x1_0000,
        ops in prop::collection::vec(op(), 1..400),
    ) {
        let table = TableConfig::new()
            .flags(flags)
            .base(base)
            .max_count(PAGE_CAPACITY as u32)
            .build()
            .unwrap();
        check_against_model(&table, &ops)?;
    }

    /// Handles always land in `[base, base + capacity)`.
    #[test]
    fn handles_stay_in_range(
        base in 0u32..u32::MAX / 2,
        max_count in 1u32..3 * PAGE_CAPACITY as u32,
        count in 1usize..3000,
    ) {
        let table = TableConfig::<u64>::new()
            .base(base)
            .max_count(max_count)
            .build()
            .unwrap();
        let capacity = table.capacity();
        prop_assert!(capacity >= max_count);
        prop_assert_eq!(capacity as usize % PAGE_CAPACITY, 0);

        for i in 0..count.min(capacity as usize) {
            let handle = table.alloc(fake_payload(i)).unwrap();
            prop_assert!(handle.as_u32() >= base);
            prop_assert!(handle.as_u32() - base < capacity);
        }
    }

    /// Context tables only resolve with the context the entry was stored with.
    #[test]
    fn context_mismatch_is_not_found(ctx in any::<usize>(), other in any::<usize>()) {
        prop_assume!(ctx != other);
        let table = TableConfig::<u64>::new()
            .flags(TableFlags::LOCKED | TableFlags::CONTEXT)
            .max_count(16)
            .build()
            .unwrap();
        let payload = fake_payload(0);
        let handle = table.alloc_with_ctx(payload, ctx).unwrap();

        prop_assert_eq!(table.lookup_with_ctx(handle, other), Err(Error::NotFound));
        prop_assert_eq!(table.free_with_ctx(handle, other), Err(Error::NotFound));
        prop_assert_eq!(table.free_with_ctx(handle, ctx), Ok(payload));
    }

    /// Creation accepts every range that fits below `u32::MAX` and never
    /// hands out a handle past it.
    #[test]
    fn create_validates_range(
        base in prop_oneof![any::<u32>(), (u32::MAX - 10_000)..=u32::MAX],
        max_count in prop_oneof![any::<u32>(), 0u32..10_000],
    ) {
        let fits = max_count > 0 && u64::from(base) + u64::from(max_count) < u64::from(u32::MAX);
        let result = HandleTable::<u64>::create_ex(TableFlags::NONE, base, max_count, None);
        match result {
            Ok(table) => {
                prop_assert!(max_count > 0);
                prop_assert!(table.capacity() >= max_count.min(MAX_SLOTS));
                prop_assert!(u64::from(base) + u64::from(table.capacity()) <= u64::from(u32::MAX));
            }
            Err(err) => {
                prop_assert!(!fits, "rejected base {base:#x} with max {max_count}");
                prop_assert_eq!(err, Error::InvalidArgument);
            }
        }
    }
}
