#![forbid(unsafe_code)]

use super::context::Context;
use super::dialect::quote_ident;
use super::versions::{
    history_columns, history_row, require_counter, scope_from_row, used_versions_between,
};
use super::window::FreeSlotCursor;
use super::{DriftPair, DriftPairReport, DriftReport, HistoryRow, RepairConfig, StoreError};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use rv_core::ids::GroupResource;
use rv_core::model::HistoryAction;
use std::cmp::Ordering;

const OPERATION: &str = "repair drift";

/// Latest history revisions that are not deletions although their live row is gone.
fn orphaned_latest_sql(select: &str, pair_filter: bool) -> String {
    let group = quote_ident("group");
    let resource = quote_ident("resource");
    let resource_table = quote_ident("resource");
    let filter = if pair_filter {
        format!("WHERE {group}=?1 AND {resource}=?2")
    } else {
        String::new()
    };
    format!(
        "SELECT {select} FROM resource_history h \
         JOIN ( \
           SELECT namespace, {group} AS g, {resource} AS r, name, MAX(resource_version) AS max_rv \
           FROM resource_history {filter} \
           GROUP BY namespace, {group}, {resource}, name \
         ) latest \
           ON latest.namespace = h.namespace AND latest.g = h.{group} AND latest.r = h.{resource} \
          AND latest.name = h.name AND latest.max_rv = h.resource_version \
         WHERE h.action != ?{deleted} \
           AND NOT EXISTS (SELECT 1 FROM {resource_table} live WHERE live.guid = h.guid)",
        deleted = if pair_filter { 3 } else { 1 },
    )
}

fn drift_scopes(conn: &Connection) -> Result<Vec<GroupResource>, StoreError> {
    let sql = format!(
        "{} ORDER BY 1 ASC, 2 ASC",
        orphaned_latest_sql(
            &format!(
                "DISTINCT h.{}, h.{}",
                quote_ident("group"),
                quote_ident("resource")
            ),
            false
        )
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![HistoryAction::Deleted.code()])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(scope_from_row(row.get(0)?, row.get(1)?)?);
    }
    Ok(out)
}

fn drift_rows(
    conn: &Connection,
    group: &str,
    resource: &str,
) -> Result<Vec<HistoryRow>, StoreError> {
    let sql = format!(
        "{} ORDER BY h.resource_version ASC, h.namespace ASC, h.name ASC, h.guid ASC",
        orphaned_latest_sql(&history_columns("h"), true)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![group, resource, HistoryAction::Deleted.code()])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(history_row(row)?);
    }
    // Assignment order follows byte order, not the SQL collation.
    out.sort_by(drift_order);
    Ok(out)
}

fn drift_order(a: &HistoryRow, b: &HistoryRow) -> Ordering {
    a.resource_version
        .cmp(&b.resource_version)
        .then_with(|| a.namespace.cmp(&b.namespace))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.guid.cmp(&b.guid))
}

/// Detection only: every pair with drift and its orphaned rows.
pub fn find_drift(conn: &Connection, ctx: &Context) -> Result<Vec<DriftPair>, StoreError> {
    let mut out = Vec::new();
    for scope in drift_scopes(conn)? {
        ctx.check()?;
        let rows = drift_rows(conn, scope.group(), scope.resource())
            .map_err(|err| err.in_pair("find drift", scope.group(), scope.resource()))?;
        out.push(DriftPair { scope, rows });
    }
    Ok(out)
}

/// Appends a deletion revision for every identity whose latest revision is not a
/// deletion although its live row is gone. Each pair commits on its own; the first
/// failing pair aborts the run.
pub fn repair_drift(
    conn: &mut Connection,
    ctx: &Context,
    cfg: &RepairConfig,
) -> Result<DriftReport, StoreError> {
    cfg.validate()?;
    let scopes = drift_scopes(conn)?;
    tracing::info!(pairs = scopes.len(), "drift detected");

    let mut report = DriftReport::default();
    for scope in scopes {
        ctx.check()?;
        let pair = repair_drift_pair(conn, ctx, cfg, &scope)
            .map_err(|err| err.in_pair(OPERATION, scope.group(), scope.resource()))?;
        if let Some(pair) = pair {
            report.pairs.push(pair);
        }
    }
    tracing::info!(
        pairs = report.pairs.len(),
        rows = report.rows_repaired(),
        "drift repair finished"
    );
    Ok(report)
}

fn repair_drift_pair(
    conn: &mut Connection,
    ctx: &Context,
    cfg: &RepairConfig,
    scope: &GroupResource,
) -> Result<Option<DriftPairReport>, StoreError> {
    let (group, resource) = (scope.group(), scope.resource());
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let rows = drift_rows(&tx, group, resource)?;
    let Some(highest) = rows.iter().map(|row| row.resource_version).max() else {
        return Ok(None);
    };
    let upper_bound = require_counter(&tx, group, resource)?;

    let slots = {
        let mut cursor =
            FreeSlotCursor::new(highest, upper_bound, cfg.batch_size, |after, limit| {
                ctx.check()?;
                used_versions_between(&tx, group, resource, after, upper_bound, limit)
            });
        cursor.take(rows.len())?
    };
    if slots.len() < rows.len() {
        tracing::warn!(
            group,
            resource,
            assigned = slots.len(),
            needed = rows.len(),
            upper_bound,
            "not enough free resource versions for drift repair"
        );
        return Err(StoreError::VersionSpaceExhausted {
            group: group.to_string(),
            resource: resource.to_string(),
            assigned: slots.len(),
            needed: rows.len(),
            upper_bound,
        });
    }

    let mut assigned = Vec::with_capacity(rows.len());
    for (row, rv) in rows.iter().zip(slots) {
        insert_deletion_tx(&tx, row, rv)?;
        assigned.push((row.resource_version, rv));
    }

    ctx.check()?;
    tx.commit()?;
    tracing::info!(
        group,
        resource,
        rows = assigned.len(),
        upper_bound,
        "appended deletion revisions"
    );
    Ok(Some(DriftPairReport {
        scope: scope.clone(),
        upper_bound,
        assigned,
    }))
}

fn insert_deletion_tx(tx: &Transaction<'_>, row: &HistoryRow, rv: i64) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO resource_history(guid, resource_version, {}, {}, namespace, name, value, action, \
           label_set, previous_resource_version, folder, generation, key_path) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        quote_ident("group"),
        quote_ident("resource")
    );
    tx.execute(
        &sql,
        params![
            uuid::Uuid::new_v4().to_string(),
            rv,
            row.group,
            row.resource,
            row.namespace,
            row.name,
            row.value,
            HistoryAction::Deleted.code(),
            row.label_set,
            row.resource_version,
            row.folder,
            row.generation,
            row.key_path_at(rv, HistoryAction::Deleted),
        ],
    )?;
    Ok(())
}
