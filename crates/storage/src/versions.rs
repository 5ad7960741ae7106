#![forbid(unsafe_code)]

use super::dialect::{CURRENT_EPOCH_MICROS_SQL, placeholders, quote_ident};
use super::{HistoryRow, StoreError};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use rv_core::ids::GroupResource;
use rv_core::model::HistoryAction;

pub(crate) fn history_columns(alias: &str) -> String {
    let group = quote_ident("group");
    let resource = quote_ident("resource");
    [
        "guid",
        "resource_version",
        group.as_str(),
        resource.as_str(),
        "namespace",
        "name",
        "value",
        "action",
        "label_set",
        "previous_resource_version",
        "folder",
        "generation",
        "key_path",
    ]
    .iter()
    .map(|column| format!("{alias}.{column}"))
    .collect::<Vec<_>>()
    .join(", ")
}

pub(crate) fn history_row(row: &Row<'_>) -> Result<HistoryRow, StoreError> {
    let action_code: i64 = row.get(7)?;
    let action =
        HistoryAction::from_code(action_code).ok_or(StoreError::UnknownAction(action_code))?;
    Ok(HistoryRow {
        guid: row.get(0)?,
        resource_version: row.get(1)?,
        group: row.get(2)?,
        resource: row.get(3)?,
        namespace: row.get(4)?,
        name: row.get(5)?,
        value: row.get(6)?,
        action,
        label_set: row.get(8)?,
        previous_resource_version: row.get(9)?,
        folder: row.get(10)?,
        generation: row.get(11)?,
        key_path: row.get(12)?,
    })
}

pub(crate) fn scope_from_row(group: String, resource: String) -> Result<GroupResource, StoreError> {
    GroupResource::try_new(group, resource)
        .map_err(|_| StoreError::InvalidInput("invalid group/resource pair in store"))
}

pub(crate) fn read_counter(
    conn: &Connection,
    group: &str,
    resource: &str,
) -> Result<Option<i64>, StoreError> {
    let sql = format!(
        "SELECT resource_version FROM resource_version WHERE {}=?1 AND {}=?2",
        quote_ident("group"),
        quote_ident("resource")
    );
    let value = conn
        .query_row(&sql, params![group, resource], |row| row.get::<_, i64>(0))
        .optional()?;
    Ok(value)
}

pub(crate) fn require_counter(
    conn: &Connection,
    group: &str,
    resource: &str,
) -> Result<i64, StoreError> {
    read_counter(conn, group, resource)?.ok_or_else(|| {
        tracing::warn!(group, resource, "no resource_version counter for pair");
        StoreError::MissingCounter {
            group: group.to_string(),
            resource: resource.to_string(),
        }
    })
}

pub(crate) fn current_epoch_micros(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row(CURRENT_EPOCH_MICROS_SQL, [], |row| row.get(0))?)
}

/// Versions in use by either table for the pair, strictly between `after` and `before`.
pub(crate) fn used_versions_between(
    conn: &Connection,
    group: &str,
    resource: &str,
    after: i64,
    before: i64,
    limit: usize,
) -> Result<Vec<i64>, StoreError> {
    let group_col = quote_ident("group");
    let resource_col = quote_ident("resource");
    let resource_table = quote_ident("resource");
    let sql = format!(
        "SELECT rv FROM ( \
           SELECT resource_version AS rv FROM resource_history \
           WHERE {group_col}=?1 AND {resource_col}=?2 AND resource_version > ?3 AND resource_version < ?4 \
           UNION \
           SELECT resource_version AS rv FROM {resource_table} \
           WHERE {group_col}=?1 AND {resource_col}=?2 AND resource_version > ?3 AND resource_version < ?4 \
         ) ORDER BY rv ASC LIMIT ?5"
    );
    let limit = i64::try_from(limit).map_err(|_| StoreError::InvalidInput("limit too large"))?;
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![group, resource, after, before, limit])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row.get::<_, i64>(0)?);
    }
    Ok(out)
}

/// Smallest version `>= floor` in use by either table for the pair.
pub(crate) fn smallest_used_at_or_above(
    conn: &Connection,
    group: &str,
    resource: &str,
    floor: i64,
) -> Result<Option<i64>, StoreError> {
    let group_col = quote_ident("group");
    let resource_col = quote_ident("resource");
    let resource_table = quote_ident("resource");
    let sql = format!(
        "SELECT MIN(rv) FROM ( \
           SELECT MIN(resource_version) AS rv FROM resource_history \
           WHERE {group_col}=?1 AND {resource_col}=?2 AND resource_version >= ?3 \
           UNION ALL \
           SELECT MIN(resource_version) AS rv FROM {resource_table} \
           WHERE {group_col}=?1 AND {resource_col}=?2 AND resource_version >= ?3 \
         )"
    );
    let value = conn.query_row(&sql, params![group, resource, floor], |row| {
        row.get::<_, Option<i64>>(0)
    })?;
    Ok(value)
}

pub(crate) fn history_rows_at_versions(
    conn: &Connection,
    group: &str,
    resource: &str,
    versions: &[i64],
) -> Result<Vec<HistoryRow>, StoreError> {
    if versions.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM resource_history h \
         WHERE h.{}=?1 AND h.{}=?2 AND h.resource_version IN ({}) \
         ORDER BY h.resource_version ASC, h.namespace ASC, h.name ASC, h.guid ASC",
        history_columns("h"),
        quote_ident("group"),
        quote_ident("resource"),
        placeholders(3, versions.len())
    );
    let mut args: Vec<SqlValue> = vec![group.to_string().into(), resource.to_string().into()];
    args.extend(versions.iter().map(|v| SqlValue::Integer(*v)));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(history_row(row)?);
    }
    Ok(out)
}

/// Points every `previous_resource_version` equal to an old version at its new one,
/// in both tables, with one conditional update per table.
pub(crate) fn repoint_previous_versions_tx(
    tx: &Transaction<'_>,
    group: &str,
    resource: &str,
    moves: &[(i64, i64)],
) -> Result<usize, StoreError> {
    if moves.is_empty() {
        return Ok(0);
    }
    let mut changed = 0usize;
    for table in ["resource_history".to_string(), quote_ident("resource")] {
        let (sql, args) = case_update_sql(&table, "previous_resource_version", group, resource, moves);
        changed += tx.execute(&sql, params_from_iter(args))?;
    }
    Ok(changed)
}

/// Moves live `resource` rows from old to new versions.
pub(crate) fn rewrite_resource_versions_tx(
    tx: &Transaction<'_>,
    group: &str,
    resource: &str,
    moves: &[(i64, i64)],
) -> Result<usize, StoreError> {
    if moves.is_empty() {
        return Ok(0);
    }
    let (sql, args) = case_update_sql(
        &quote_ident("resource"),
        "resource_version",
        group,
        resource,
        moves,
    );
    Ok(tx.execute(&sql, params_from_iter(args))?)
}

/// Moves history rows (by guid) to new versions and recomputes their key paths.
pub(crate) fn rewrite_history_versions_tx(
    tx: &Transaction<'_>,
    rows: &[(&HistoryRow, i64)],
) -> Result<usize, StoreError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut version_cases = String::new();
    let mut key_path_cases = String::new();
    let mut args: Vec<SqlValue> = Vec::with_capacity(rows.len() * 5);
    for (row, new_rv) in rows {
        let base = args.len();
        version_cases.push_str(&format!(" WHEN ?{} THEN ?{}", base + 1, base + 2));
        key_path_cases.push_str(&format!(" WHEN ?{} THEN ?{}", base + 3, base + 4));
        args.push(row.guid.clone().into());
        args.push(SqlValue::Integer(*new_rv));
        args.push(row.guid.clone().into());
        args.push(row.key_path_at(*new_rv, row.action).into());
    }
    let guid_start = args.len() + 1;
    args.extend(rows.iter().map(|(row, _)| SqlValue::from(row.guid.clone())));
    let sql = format!(
        "UPDATE resource_history SET \
           resource_version = CASE guid{version_cases} ELSE resource_version END, \
           key_path = CASE guid{key_path_cases} ELSE key_path END \
         WHERE guid IN ({})",
        placeholders(guid_start, rows.len())
    );
    Ok(tx.execute(&sql, params_from_iter(args))?)
}

fn case_update_sql(
    table: &str,
    column: &str,
    group: &str,
    resource: &str,
    moves: &[(i64, i64)],
) -> (String, Vec<SqlValue>) {
    let mut args: Vec<SqlValue> = vec![group.to_string().into(), resource.to_string().into()];
    let mut cases = String::new();
    for (old, new) in moves {
        let base = args.len();
        cases.push_str(&format!(" WHEN ?{} THEN ?{}", base + 1, base + 2));
        args.push(SqlValue::Integer(*old));
        args.push(SqlValue::Integer(*new));
    }
    let in_start = args.len() + 1;
    args.extend(moves.iter().map(|(old, _)| SqlValue::Integer(*old)));
    let sql = format!(
        "UPDATE {table} SET {column} = CASE {column}{cases} ELSE {column} END \
         WHERE {}=?1 AND {}=?2 AND {column} IN ({})",
        quote_ident("group"),
        quote_ident("resource"),
        placeholders(in_start, moves.len())
    );
    (sql, args)
}
