#![forbid(unsafe_code)]

use super::context::Context;
use super::dialect::quote_ident;
use super::versions::{
    current_epoch_micros, history_columns, history_row, history_rows_at_versions,
    repoint_previous_versions_tx, require_counter, rewrite_history_versions_tx,
    rewrite_resource_versions_tx, scope_from_row, smallest_used_at_or_above,
    used_versions_between,
};
use super::window::FreeSlotCursor;
use super::{
    HistoryRow, RepairConfig, SmallVersionPair, SmallVersionPairReport, SmallVersionReport,
    StoreError,
};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use rv_core::ids::GroupResource;
use std::collections::HashMap;

const OPERATION: &str = "repair small resource versions";

fn small_scopes(conn: &Connection, floor: i64) -> Result<Vec<GroupResource>, StoreError> {
    let sql = format!(
        "SELECT DISTINCT {group}, {resource} FROM resource_history \
         WHERE resource_version < ?1 ORDER BY {group} ASC, {resource} ASC",
        group = quote_ident("group"),
        resource = quote_ident("resource")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![floor])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(scope_from_row(row.get(0)?, row.get(1)?)?);
    }
    Ok(out)
}

fn count_small_rows(
    conn: &Connection,
    group: &str,
    resource: &str,
    floor: i64,
) -> Result<usize, StoreError> {
    let sql = format!(
        "SELECT COUNT(1) FROM resource_history WHERE {}=?1 AND {}=?2 AND resource_version < ?3",
        quote_ident("group"),
        quote_ident("resource")
    );
    let count: i64 = conn.query_row(&sql, params![group, resource, floor], |row| row.get(0))?;
    usize::try_from(count).map_err(|_| StoreError::InvalidInput("negative row count"))
}

/// History rows below the floor in assignment order (row `i` gets `floor + i`).
/// `limit` of `None` reads them all.
fn small_rows(
    conn: &Connection,
    group: &str,
    resource: &str,
    floor: i64,
    limit: Option<usize>,
) -> Result<Vec<HistoryRow>, StoreError> {
    let sql = format!(
        "SELECT {} FROM resource_history h \
         WHERE h.{}=?1 AND h.{}=?2 AND h.resource_version < ?3 \
         ORDER BY h.resource_version ASC, h.namespace ASC, h.name ASC, h.guid ASC \
         LIMIT ?4",
        history_columns("h"),
        quote_ident("group"),
        quote_ident("resource")
    );
    let limit = match limit {
        Some(limit) => {
            i64::try_from(limit).map_err(|_| StoreError::InvalidInput("limit too large"))?
        }
        None => -1,
    };
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![group, resource, floor, limit])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(history_row(row)?);
    }
    Ok(out)
}

/// Detection only: every pair holding versions below `floor`.
pub fn find_small_versions(
    conn: &Connection,
    ctx: &Context,
    floor: i64,
) -> Result<Vec<SmallVersionPair>, StoreError> {
    let mut out = Vec::new();
    for scope in small_scopes(conn, floor)? {
        ctx.check()?;
        let rows = small_rows(conn, scope.group(), scope.resource(), floor, None).map_err(|err| {
            err.in_pair("find small resource versions", scope.group(), scope.resource())
        })?;
        out.push(SmallVersionPair { scope, rows });
    }
    Ok(out)
}

/// Moves every history version below `cfg.floor` to `floor + i`, first relocating
/// legitimate versions that occupy the target range. Each pair is one immediate
/// transaction; `cfg.batch_size` only bounds the rows read and rewritten per statement.
pub fn repair_small_versions(
    conn: &mut Connection,
    ctx: &Context,
    cfg: &RepairConfig,
) -> Result<SmallVersionReport, StoreError> {
    cfg.validate()?;
    let scopes = small_scopes(conn, cfg.floor)?;
    tracing::info!(
        pairs = scopes.len(),
        floor = cfg.floor,
        "small resource versions detected"
    );

    let mut report = SmallVersionReport::default();
    for scope in scopes {
        ctx.check()?;
        let pair = repair_pair(conn, ctx, cfg, &scope)
            .map_err(|err| err.in_pair(OPERATION, scope.group(), scope.resource()))?;
        if let Some(pair) = pair {
            report.pairs.push(pair);
        }
    }
    tracing::info!(
        pairs = report.pairs.len(),
        rewritten = report.rows_rewritten(),
        relocated = report.rows_relocated(),
        "small resource version repair finished"
    );
    Ok(report)
}

fn exhausted(
    scope: &GroupResource,
    assigned: usize,
    needed: usize,
    upper_bound: i64,
) -> StoreError {
    tracing::warn!(
        group = scope.group(),
        resource = scope.resource(),
        assigned,
        needed,
        upper_bound,
        "not enough free resource versions above the floor"
    );
    StoreError::VersionSpaceExhausted {
        group: scope.group().to_string(),
        resource: scope.resource().to_string(),
        assigned,
        needed,
        upper_bound,
    }
}

fn repair_pair(
    conn: &mut Connection,
    ctx: &Context,
    cfg: &RepairConfig,
    scope: &GroupResource,
) -> Result<Option<SmallVersionPairReport>, StoreError> {
    let (group, resource) = (scope.group(), scope.resource());
    let floor = cfg.floor;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let needed = count_small_rows(&tx, group, resource, floor)?;
    if needed == 0 {
        return Ok(None);
    }
    let upper_bound = require_counter(&tx, group, resource)?;
    // A database clock behind the floor must not turn bad rows into blockers.
    let ceiling = match smallest_used_at_or_above(&tx, group, resource, floor)? {
        Some(rv) => rv,
        None => current_epoch_micros(&tx)?.max(floor),
    };
    let window_end = i64::try_from(needed)
        .ok()
        .and_then(|needed| floor.checked_add(needed))
        .ok_or(StoreError::InvalidInput("rewrite window overflows"))?;
    if window_end > upper_bound {
        return Err(exhausted(scope, 0, needed, upper_bound));
    }
    tracing::debug!(
        group,
        resource,
        needed,
        ceiling,
        upper_bound,
        "planning small version rewrite"
    );

    let relocated = if window_end > ceiling {
        make_room(&tx, ctx, cfg, scope, ceiling, window_end, upper_bound)?
    } else {
        Vec::new()
    };

    // Rewritten rows leave the below-floor set, so each read returns the next batch.
    let mut rewritten: Vec<(i64, i64)> = Vec::with_capacity(needed);
    let mut next_rv = floor;
    while rewritten.len() < needed {
        ctx.check()?;
        let limit = cfg.batch_size.min(needed - rewritten.len());
        let batch = small_rows(&tx, group, resource, floor, Some(limit))?;
        if batch.is_empty() {
            break;
        }
        let targets: Vec<(&HistoryRow, i64)> = batch
            .iter()
            .map(|row| {
                let target = (row, next_rv);
                next_rv += 1;
                target
            })
            .collect();
        let moves: Vec<(i64, i64)> = targets
            .iter()
            .map(|(row, rv)| (row.resource_version, *rv))
            .collect();

        repoint_previous_versions_tx(&tx, group, resource, &moves)?;
        rewrite_history_versions_tx(&tx, &targets)?;
        rewrite_resource_versions_tx(&tx, group, resource, &moves)?;
        tracing::debug!(group, resource, rows = moves.len(), "rewrote small versions");
        rewritten.extend(moves);
    }

    ctx.check()?;
    tx.commit()?;
    tracing::info!(
        group,
        resource,
        rewritten = rewritten.len(),
        relocated = relocated.len(),
        "raised small resource versions to the floor"
    );
    Ok(Some(SmallVersionPairReport {
        scope: scope.clone(),
        ceiling,
        upper_bound,
        relocated,
        rewritten,
    }))
}

/// Relocates every version in `[ceiling, window_end)` to free slots at or above
/// `window_end`, so the rewrite window is empty before bad rows move into it.
fn make_room(
    tx: &Transaction<'_>,
    ctx: &Context,
    cfg: &RepairConfig,
    scope: &GroupResource,
    ceiling: i64,
    window_end: i64,
    upper_bound: i64,
) -> Result<Vec<(i64, i64)>, StoreError> {
    let (group, resource) = (scope.group(), scope.resource());
    // Slots handed out are never above the cursor's last fetch unless the tail is free,
    // so relocating into them does not disturb later windows.
    let mut cursor =
        FreeSlotCursor::new(window_end - 1, upper_bound, cfg.batch_size, |after, limit| {
            ctx.check()?;
            used_versions_between(tx, group, resource, after, upper_bound, limit)
        });

    let mut moves: Vec<(i64, i64)> = Vec::new();
    loop {
        ctx.check()?;
        // Relocated versions leave the window, so each read returns the next blockers.
        let blockers =
            used_versions_between(tx, group, resource, ceiling - 1, window_end, cfg.batch_size)?;
        if blockers.is_empty() {
            break;
        }
        let targets = cursor.take(blockers.len())?;
        if targets.len() < blockers.len() {
            return Err(exhausted(
                scope,
                moves.len() + targets.len(),
                moves.len() + blockers.len(),
                upper_bound,
            ));
        }

        let batch: Vec<(i64, i64)> = blockers.into_iter().zip(targets).collect();
        let old_versions: Vec<i64> = batch.iter().map(|(old, _)| *old).collect();
        let new_by_old: HashMap<i64, i64> = batch.iter().copied().collect();
        let rows = history_rows_at_versions(tx, group, resource, &old_versions)?;
        let history_moves: Vec<(&HistoryRow, i64)> = rows
            .iter()
            .filter_map(|row| {
                new_by_old
                    .get(&row.resource_version)
                    .map(|new_rv| (row, *new_rv))
            })
            .collect();

        repoint_previous_versions_tx(tx, group, resource, &batch)?;
        rewrite_history_versions_tx(tx, &history_moves)?;
        rewrite_resource_versions_tx(tx, group, resource, &batch)?;
        tracing::debug!(group, resource, rows = batch.len(), "relocated blocking versions");
        moves.extend(batch);
    }
    Ok(moves)
}
