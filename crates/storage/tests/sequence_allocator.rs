mod common;

use common::temp_storage_dir;
use rv_storage::{
    Context, CounterStore, DEFAULT_SEQUENCE_BATCH_SIZE, SequenceAllocator, SqliteStore, StoreError,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Counts persisted reservations and can fail the first `fail_first` of them.
struct CountingStore<S> {
    inner: S,
    reservations: AtomicUsize,
    fail_first: AtomicUsize,
}

impl<S> CountingStore<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            reservations: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        }
    }

    fn reservations(&self) -> usize {
        self.reservations.load(Ordering::SeqCst)
    }
}

impl<S: CounterStore> CounterStore for CountingStore<S> {
    fn reserve(&self, ctx: &Context, key: &str, count: i64) -> Result<i64, StoreError> {
        let pending_failures = self.fail_first.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_first.store(pending_failures - 1, Ordering::SeqCst);
            return Err(StoreError::InvalidInput("injected reservation failure"));
        }
        self.reservations.fetch_add(1, Ordering::SeqCst);
        self.inner.reserve(ctx, key, count)
    }
}

fn open_allocator(label: &str) -> (SqliteStore, SequenceAllocator<Arc<CountingStore<rv_storage::SqliteCounterStore>>>) {
    let dir = temp_storage_dir(label);
    let store = SqliteStore::open(&dir).expect("store should open");
    let counters = store.counter_store().expect("file-backed counter store");
    let allocator = SequenceAllocator::new(Arc::new(CountingStore::new(counters)));
    (store, allocator)
}

#[test]
fn batches_amortize_persisted_transactions() {
    let (_store, allocator) = open_allocator("seq-250");
    assert_eq!(allocator.batch_size(), DEFAULT_SEQUENCE_BATCH_SIZE);
    let ctx = Context::background();

    let values: Vec<i64> = (0..250)
        .map(|_| allocator.next(&ctx, "resource_history.id").expect("next value"))
        .collect();
    assert_eq!(values, (1..=250).collect::<Vec<_>>());
    assert!(allocator.store().reservations() <= 3);
}

#[test]
fn concurrent_callers_never_see_duplicates() {
    let (_store, allocator) = open_allocator("seq-concurrent");
    let allocator = Arc::new(allocator);
    allocator.set_batch_size(7).expect("batch size");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                let ctx = Context::background();
                (0..50)
                    .map(|_| allocator.next(&ctx, "shared").expect("next value"))
                    .collect::<Vec<i64>>()
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for handle in handles {
        let values = handle.join().expect("thread should not panic");
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
        for value in values {
            assert!(all.insert(value), "duplicate value {value}");
        }
    }
    assert_eq!(all.len(), 400);
    // Batches are drained in order, so the whole range is gap-free.
    assert_eq!(all.iter().copied().collect::<Vec<_>>(), (1..=400).collect::<Vec<_>>());
}

#[test]
fn keys_are_independent() {
    let (_store, allocator) = open_allocator("seq-keys");
    let ctx = Context::background();
    assert_eq!(allocator.next(&ctx, "a").expect("a"), 1);
    assert_eq!(allocator.next(&ctx, "b").expect("b"), 1);
    assert_eq!(allocator.next(&ctx, "a").expect("a"), 2);
    assert_eq!(allocator.store().reservations(), 2);
}

#[test]
fn separate_allocators_reserve_disjoint_batches() {
    let dir = temp_storage_dir("seq-two-processes");
    let store = SqliteStore::open(&dir).expect("store should open");
    let first = SequenceAllocator::new(store.counter_store().expect("counters"));
    let second = SequenceAllocator::new(store.counter_store().expect("counters"));
    let ctx = Context::background();

    assert_eq!(first.next(&ctx, "k").expect("first"), 1);
    assert_eq!(second.next(&ctx, "k").expect("second"), 101);
    assert_eq!(first.next(&ctx, "k").expect("first"), 2);
    assert_eq!(second.next(&ctx, "k").expect("second"), 102);
}

#[test]
fn reset_drops_local_batches_but_not_persisted_counters() {
    let (_store, allocator) = open_allocator("seq-reset");
    allocator.set_batch_size(10).expect("batch size");
    let ctx = Context::background();

    assert_eq!(allocator.next(&ctx, "k").expect("next"), 1);
    assert_eq!(allocator.next(&ctx, "k").expect("next"), 2);
    allocator.reset().expect("reset");
    assert_eq!(allocator.next(&ctx, "k").expect("next"), 11);
    assert_eq!(allocator.store().reservations(), 2);
}

#[test]
fn failed_reservation_leaves_state_untouched() {
    let (_store, allocator) = open_allocator("seq-failure");
    allocator.store().fail_first.store(1, Ordering::SeqCst);
    let ctx = Context::background();

    let err = allocator.next(&ctx, "k").expect_err("injected failure");
    assert_eq!(err.code(), "INVALID_INPUT");
    assert_eq!(allocator.next(&ctx, "k").expect("retry"), 1);
    assert_eq!(allocator.next(&ctx, "k").expect("next"), 2);
}

#[test]
fn invalid_batch_size_and_cancellation_are_rejected() {
    let (_store, allocator) = open_allocator("seq-invalid");
    assert!(allocator.set_batch_size(0).is_err());
    assert_eq!(allocator.batch_size(), DEFAULT_SEQUENCE_BATCH_SIZE);

    let ctx = Context::background();
    ctx.cancel();
    let err = allocator.next(&ctx, "k").expect_err("cancelled");
    assert!(matches!(err, StoreError::Cancelled));
    assert_eq!(allocator.store().reservations(), 1);
}

#[test]
fn in_memory_store_has_no_counter_store() {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    assert!(store.counter_store().is_err());
}
