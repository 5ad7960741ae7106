#![forbid(unsafe_code)]

mod context;
pub mod dialect;
mod drift;
mod error;
mod schema;
mod sequence;
mod small_versions;
mod types;
mod verify;
mod versions;
mod window;

pub use context::Context;
pub use drift::{find_drift, repair_drift};
pub use error::StoreError;
pub use sequence::{CounterStore, DEFAULT_SEQUENCE_BATCH_SIZE, SequenceAllocator, SqliteCounterStore};
pub use small_versions::{find_small_versions, repair_small_versions};
pub use types::*;
pub use verify::verify_integrity;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE_NAME: &str = "resource_store.db";

/// SQLite-backed versioned resource store: `resource`, `resource_history`,
/// `resource_version` and the allocator's `sequence_counter`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref();
        std::fs::create_dir_all(storage_dir)?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::install_schema(&conn)?;
        tracing::debug!(path = %db_path.display(), "opened resource store");

        Ok(Self {
            conn,
            db_path: Some(db_path),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::install_schema(&conn)?;
        Ok(Self {
            conn,
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Session handle for the repair entry points and for callers issuing their own SQL.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Persisted counters for a [`SequenceAllocator`] sharing this database file.
    pub fn counter_store(&self) -> Result<SqliteCounterStore, StoreError> {
        self.db_path
            .as_deref()
            .map(SqliteCounterStore::new)
            .ok_or(StoreError::InvalidInput(
                "in-memory stores cannot back a sequence allocator",
            ))
    }

    pub fn repair_drift(
        &mut self,
        ctx: &Context,
        cfg: &RepairConfig,
    ) -> Result<DriftReport, StoreError> {
        repair_drift(&mut self.conn, ctx, cfg)
    }

    pub fn repair_small_versions(
        &mut self,
        ctx: &Context,
        cfg: &RepairConfig,
    ) -> Result<SmallVersionReport, StoreError> {
        repair_small_versions(&mut self.conn, ctx, cfg)
    }

    pub fn find_drift(&self, ctx: &Context) -> Result<Vec<DriftPair>, StoreError> {
        find_drift(&self.conn, ctx)
    }

    pub fn find_small_versions(
        &self,
        ctx: &Context,
        floor: i64,
    ) -> Result<Vec<SmallVersionPair>, StoreError> {
        find_small_versions(&self.conn, ctx, floor)
    }

    pub fn verify_integrity(&self, ctx: &Context) -> Result<Vec<IntegrityIssue>, StoreError> {
        verify_integrity(&self.conn, ctx)
    }
}
