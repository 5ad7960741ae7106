#![forbid(unsafe_code)]

use super::StoreError;
use super::context::Context;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_SEQUENCE_BATCH_SIZE: i64 = 100;

/// Persisted side of the allocator: reserves `count` consecutive values for `key` and
/// returns the first one. A reservation is all-or-nothing.
pub trait CounterStore: Send + Sync {
    fn reserve(&self, ctx: &Context, key: &str, count: i64) -> Result<i64, StoreError>;
}

impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    fn reserve(&self, ctx: &Context, key: &str, count: i64) -> Result<i64, StoreError> {
        (**self).reserve(ctx, key, count)
    }
}

/// `sequence_counter` table in a SQLite database file. Every reservation runs on its
/// own connection inside an immediate transaction, so concurrent allocators (in this
/// process or others) never read the same `next_value`.
#[derive(Clone, Debug)]
pub struct SqliteCounterStore {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteCounterStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

impl CounterStore for SqliteCounterStore {
    fn reserve(&self, ctx: &Context, key: &str, count: i64) -> Result<i64, StoreError> {
        ctx.check()?;
        let mut conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        reserve_tx(&mut conn, ctx, key, count)
    }
}

pub(crate) fn reserve_tx(
    conn: &mut Connection,
    ctx: &Context,
    key: &str,
    count: i64,
) -> Result<i64, StoreError> {
    if count < 1 {
        return Err(StoreError::InvalidInput("reservation must be at least 1"));
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current: Option<i64> = tx
        .query_row(
            "SELECT next_value FROM sequence_counter WHERE name=?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    let first = match current {
        Some(next_value) => next_value,
        None => {
            tx.execute(
                "INSERT INTO sequence_counter(name, next_value) VALUES (?1, 1)",
                params![key],
            )?;
            1
        }
    };
    let next_value = first
        .checked_add(count)
        .ok_or(StoreError::InvalidInput("sequence counter overflow"))?;
    tx.execute(
        "UPDATE sequence_counter SET next_value=?2 WHERE name=?1",
        params![key, next_value],
    )?;
    ctx.check()?;
    tx.commit()?;
    tracing::debug!(key, first, last = next_value - 1, "reserved sequence batch");
    Ok(first)
}

#[derive(Debug)]
struct KeyBatch {
    next_value: i64,
    last_value_in_batch: i64,
}

impl Default for KeyBatch {
    fn default() -> Self {
        Self {
            next_value: 1,
            last_value_in_batch: 0,
        }
    }
}

/// Hands out strictly increasing integers per counter key, reserving them from the
/// persisted counter in batches. The key map lock is only held to find a key's slot;
/// allocation runs under that key's own lock, so unrelated keys never wait on each other.
pub struct SequenceAllocator<S> {
    store: S,
    batch_size: AtomicI64,
    keys: Mutex<HashMap<String, Arc<Mutex<KeyBatch>>>>,
}

impl<S: CounterStore> SequenceAllocator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            batch_size: AtomicI64::new(DEFAULT_SEQUENCE_BATCH_SIZE),
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size.load(Ordering::SeqCst)
    }

    /// Applies to the next reservation of every key.
    pub fn set_batch_size(&self, batch_size: i64) -> Result<(), StoreError> {
        if batch_size < 1 {
            return Err(StoreError::InvalidInput("batch size must be at least 1"));
        }
        self.batch_size.store(batch_size, Ordering::SeqCst);
        Ok(())
    }

    pub fn next(&self, ctx: &Context, key: &str) -> Result<i64, StoreError> {
        let slot = {
            let mut keys = lock(&self.keys)?;
            Arc::clone(keys.entry(key.to_string()).or_default())
        };
        let mut batch = lock(&slot)?;
        if batch.next_value > batch.last_value_in_batch {
            let count = self.batch_size();
            let first = self.store.reserve(ctx, key, count)?;
            batch.next_value = first;
            batch.last_value_in_batch = first + count - 1;
        }
        let value = batch.next_value;
        batch.next_value += 1;
        Ok(value)
    }

    /// Forgets every in-memory batch. The persisted counters are untouched, so values
    /// handed out afterwards still never repeat.
    pub fn reset(&self) -> Result<(), StoreError> {
        lock(&self.keys)?.clear();
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::LockPoisoned)
}
