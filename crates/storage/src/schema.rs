#![forbid(unsafe_code)]

use super::StoreError;
use super::dialect::quote_ident;
use rusqlite::{Connection, params};

pub(crate) const SCHEMA_VERSION: &str = "v1";

fn full_schema_sql() -> String {
    let group = quote_ident("group");
    let resource = quote_ident("resource");
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {resource} (
          guid TEXT PRIMARY KEY,
          resource_version INTEGER NOT NULL,
          {group} TEXT NOT NULL,
          {resource} TEXT NOT NULL,
          namespace TEXT NOT NULL,
          name TEXT NOT NULL,
          value TEXT,
          action INTEGER NOT NULL,
          label_set TEXT,
          previous_resource_version INTEGER NOT NULL DEFAULT 0,
          folder TEXT NOT NULL DEFAULT '',
          generation INTEGER NOT NULL DEFAULT 0
        );

        CREATE UNIQUE INDEX IF NOT EXISTS uq_resource_identity
          ON {resource}(namespace, {group}, {resource}, name);

        CREATE TABLE IF NOT EXISTS resource_history (
          guid TEXT PRIMARY KEY,
          resource_version INTEGER NOT NULL,
          {group} TEXT NOT NULL,
          {resource} TEXT NOT NULL,
          namespace TEXT NOT NULL,
          name TEXT NOT NULL,
          value TEXT,
          action INTEGER NOT NULL,
          label_set TEXT,
          previous_resource_version INTEGER NOT NULL DEFAULT 0,
          folder TEXT NOT NULL DEFAULT '',
          generation INTEGER NOT NULL DEFAULT 0,
          key_path TEXT NOT NULL DEFAULT ''
        );

        CREATE UNIQUE INDEX IF NOT EXISTS uq_resource_history_identity_rv
          ON resource_history(namespace, {group}, {resource}, name, resource_version);
        CREATE INDEX IF NOT EXISTS idx_resource_history_rv
          ON resource_history(resource_version);
        CREATE INDEX IF NOT EXISTS idx_resource_history_pair_rv
          ON resource_history({group}, {resource}, resource_version);

        CREATE TABLE IF NOT EXISTS resource_version (
          {group} TEXT NOT NULL,
          {resource} TEXT NOT NULL,
          resource_version INTEGER NOT NULL,
          PRIMARY KEY ({group}, {resource})
        );

        CREATE TABLE IF NOT EXISTS sequence_counter (
          name TEXT PRIMARY KEY,
          next_value INTEGER NOT NULL
        );
        "#
    )
}

pub(crate) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&full_schema_sql())?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    Ok(())
}
