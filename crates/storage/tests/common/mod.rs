#![allow(dead_code)]

use rusqlite::{Connection, params};
use rv_core::ids::ResourceKey;
use rv_core::model::HistoryAction;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_storage_dir(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic enough for tests")
        .as_nanos();
    path.push(format!("rv-storage-{label}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&path).expect("temp storage dir must be creatable");
    path
}

pub fn key(namespace: &str, group: &str, resource: &str, name: &str) -> ResourceKey {
    ResourceKey::try_new(namespace, group, resource, name).expect("valid resource key")
}

/// Appends one history revision the way the write path does and returns its guid.
pub fn insert_history(
    conn: &Connection,
    key: &ResourceKey,
    rv: i64,
    action: HistoryAction,
    previous_rv: i64,
) -> String {
    let guid = uuid::Uuid::new_v4().to_string();
    let value = serde_json::json!({
        "metadata": { "name": key.name(), "namespace": key.namespace() },
        "rv": rv,
    })
    .to_string();
    conn.execute(
        "INSERT INTO resource_history(guid, resource_version, \"group\", \"resource\", namespace, name, \
           value, action, label_set, previous_resource_version, folder, generation, key_path) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10, 1, ?11)",
        params![
            guid,
            rv,
            key.group(),
            key.resource(),
            key.namespace(),
            key.name(),
            value,
            action.code(),
            previous_rv,
            "folder-a",
            rv_core::key_path(
                key.group(),
                key.resource(),
                key.namespace(),
                key.name(),
                rv,
                action,
                "folder-a"
            ),
        ],
    )
    .expect("history row should insert");
    guid
}

/// Live row mirroring the latest history revision `guid`.
pub fn insert_live(conn: &Connection, key: &ResourceKey, guid: &str, rv: i64, previous_rv: i64) {
    conn.execute(
        "INSERT INTO \"resource\"(guid, resource_version, \"group\", \"resource\", namespace, name, \
           value, action, label_set, previous_resource_version, folder, generation) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}', 2, NULL, ?7, 'folder-a', 1)",
        params![
            guid,
            rv,
            key.group(),
            key.resource(),
            key.namespace(),
            key.name(),
            previous_rv,
        ],
    )
    .expect("live row should insert");
}

pub fn set_counter(conn: &Connection, group: &str, resource: &str, rv: i64) {
    conn.execute(
        "INSERT INTO resource_version(\"group\", \"resource\", resource_version) VALUES (?1, ?2, ?3) \
         ON CONFLICT(\"group\", \"resource\") DO UPDATE SET resource_version=excluded.resource_version",
        params![group, resource, rv],
    )
    .expect("counter should upsert");
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revision {
    pub namespace: String,
    pub name: String,
    pub rv: i64,
    pub previous_rv: i64,
    pub action: i64,
    pub key_path: String,
}

/// All history revisions of a pair ordered by version.
pub fn history(conn: &Connection, group: &str, resource: &str) -> Vec<Revision> {
    let mut stmt = conn
        .prepare(
            "SELECT namespace, name, resource_version, previous_resource_version, action, key_path \
             FROM resource_history WHERE \"group\"=?1 AND \"resource\"=?2 \
             ORDER BY resource_version ASC, namespace ASC, name ASC",
        )
        .expect("history query should prepare");
    stmt.query_map(params![group, resource], |row| {
        Ok(Revision {
            namespace: row.get(0)?,
            name: row.get(1)?,
            rv: row.get(2)?,
            previous_rv: row.get(3)?,
            action: row.get(4)?,
            key_path: row.get(5)?,
        })
    })
    .expect("history query should run")
    .collect::<Result<Vec<_>, _>>()
    .expect("history rows should map")
}

pub fn revisions_of(conn: &Connection, key: &ResourceKey) -> Vec<Revision> {
    history(conn, key.group(), key.resource())
        .into_iter()
        .filter(|rev| rev.namespace == key.namespace() && rev.name == key.name())
        .collect()
}

/// `(resource_version, previous_resource_version)` of the live row, if any.
pub fn live_versions(conn: &Connection, key: &ResourceKey) -> Option<(i64, i64)> {
    conn.query_row(
        "SELECT resource_version, previous_resource_version FROM \"resource\" \
         WHERE namespace=?1 AND \"group\"=?2 AND \"resource\"=?3 AND name=?4",
        params![key.namespace(), key.group(), key.resource(), key.name()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .ok()
}

pub fn history_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(1) FROM resource_history", [], |row| row.get(0))
        .expect("count should run")
}
