#![forbid(unsafe_code)]

use super::context::Context;
use super::dialect::quote_ident;
use super::drift::find_drift;
use super::versions::scope_from_row;
use super::{IntegrityIssue, StoreError};
use rusqlite::Connection;

/// Checks the invariants the repairs restore: unique versions per pair, resolvable
/// back-references, versions below the pair counter, and deleted identities ending in
/// a deletion revision.
pub fn verify_integrity(conn: &Connection, ctx: &Context) -> Result<Vec<IntegrityIssue>, StoreError> {
    let mut issues = Vec::new();
    duplicate_versions(conn, &mut issues)?;
    ctx.check()?;
    for table in ["resource_history".to_string(), quote_ident("resource")] {
        dangling_references(conn, &table, &mut issues)?;
        ctx.check()?;
    }
    counter_bounds(conn, &mut issues)?;
    ctx.check()?;
    for pair in find_drift(conn, ctx)? {
        for row in pair.rows {
            issues.push(IntegrityIssue::LatestNotDeleted {
                scope: pair.scope.clone(),
                guid: row.guid,
                resource_version: row.resource_version,
            });
        }
    }
    if !issues.is_empty() {
        tracing::warn!(issues = issues.len(), "integrity issues found");
    }
    Ok(issues)
}

fn duplicate_versions(conn: &Connection, issues: &mut Vec<IntegrityIssue>) -> Result<(), StoreError> {
    let group = quote_ident("group");
    let resource = quote_ident("resource");
    for table in ["resource_history".to_string(), quote_ident("resource")] {
        let sql = format!(
            "SELECT {group}, {resource}, resource_version, COUNT(1) FROM {table} \
             GROUP BY {group}, {resource}, resource_version HAVING COUNT(1) > 1 \
             ORDER BY 1, 2, 3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            issues.push(IntegrityIssue::DuplicateVersion {
                scope: scope_from_row(row.get(0)?, row.get(1)?)?,
                resource_version: row.get(2)?,
                rows: row.get(3)?,
            });
        }
    }
    Ok(())
}

fn dangling_references(
    conn: &Connection,
    table: &str,
    issues: &mut Vec<IntegrityIssue>,
) -> Result<(), StoreError> {
    let group = quote_ident("group");
    let resource = quote_ident("resource");
    let sql = format!(
        "SELECT t.{group}, t.{resource}, t.guid, t.previous_resource_version FROM {table} t \
         WHERE t.previous_resource_version != 0 AND NOT EXISTS ( \
           SELECT 1 FROM resource_history p \
           WHERE p.{group} = t.{group} AND p.{resource} = t.{resource} \
             AND p.resource_version = t.previous_resource_version \
         ) ORDER BY 1, 2, 4, 3"
    );
    let label = if table == "resource_history" {
        "resource_history"
    } else {
        "resource"
    };
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        issues.push(IntegrityIssue::DanglingReference {
            scope: scope_from_row(row.get(0)?, row.get(1)?)?,
            table: label,
            guid: row.get(2)?,
            previous_resource_version: row.get(3)?,
        });
    }
    Ok(())
}

fn counter_bounds(conn: &Connection, issues: &mut Vec<IntegrityIssue>) -> Result<(), StoreError> {
    let group = quote_ident("group");
    let resource = quote_ident("resource");
    let sql = format!(
        "SELECT u.{group}, u.{resource}, MAX(u.resource_version), c.resource_version FROM ( \
           SELECT {group}, {resource}, resource_version FROM resource_history \
           UNION ALL \
           SELECT {group}, {resource}, resource_version FROM {resource} \
         ) u \
         LEFT JOIN resource_version c ON c.{group} = u.{group} AND c.{resource} = u.{resource} \
         GROUP BY u.{group}, u.{resource} \
         ORDER BY 1, 2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let scope = scope_from_row(row.get(0)?, row.get(1)?)?;
        let max_rv: i64 = row.get(2)?;
        match row.get::<_, Option<i64>>(3)? {
            None => issues.push(IntegrityIssue::MissingCounter { scope }),
            Some(counter) if max_rv >= counter => issues.push(IntegrityIssue::VersionAboveCounter {
                scope,
                resource_version: max_rv,
                counter,
            }),
            Some(_) => {}
        }
    }
    Ok(())
}
