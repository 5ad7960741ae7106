#![forbid(unsafe_code)]

use rv_core::ids::GroupResource;
use rv_storage::{
    DriftPair, DriftReport, HistoryRow, IntegrityIssue, SmallVersionPair, SmallVersionReport,
};
use serde_json::{Value, json};

fn scope_json(scope: &GroupResource) -> Value {
    json!({ "group": scope.group(), "resource": scope.resource() })
}

fn moves_json(moves: &[(i64, i64)]) -> Value {
    json!(
        moves
            .iter()
            .map(|(from, to)| json!({ "from": from, "to": to }))
            .collect::<Vec<_>>()
    )
}

fn row_json(row: &HistoryRow) -> Value {
    json!({
        "guid": row.guid,
        "namespace": row.namespace,
        "name": row.name,
        "resource_version": row.resource_version,
        "action": row.action.as_str(),
    })
}

fn detected_pair_json(scope: &GroupResource, rows: &[HistoryRow]) -> Value {
    let mut pair = scope_json(scope);
    pair["rows"] = json!(rows.len());
    pair["revisions"] = json!(rows.iter().map(row_json).collect::<Vec<_>>());
    pair
}

pub(crate) fn drift_detection(pairs: &[DriftPair]) -> Value {
    json!({
        "rows": pairs.iter().map(|pair| pair.rows.len()).sum::<usize>(),
        "pairs": pairs
            .iter()
            .map(|pair| detected_pair_json(&pair.scope, &pair.rows))
            .collect::<Vec<_>>(),
    })
}

pub(crate) fn small_version_detection(pairs: &[SmallVersionPair]) -> Value {
    json!({
        "rows": pairs.iter().map(|pair| pair.rows.len()).sum::<usize>(),
        "pairs": pairs
            .iter()
            .map(|pair| detected_pair_json(&pair.scope, &pair.rows))
            .collect::<Vec<_>>(),
    })
}

pub(crate) fn drift(report: &DriftReport) -> Value {
    json!({
        "rows_repaired": report.rows_repaired(),
        "pairs": report
            .pairs
            .iter()
            .map(|pair| {
                let mut value = scope_json(&pair.scope);
                value["upper_bound"] = json!(pair.upper_bound);
                value["deletions"] = moves_json(&pair.assigned);
                value
            })
            .collect::<Vec<_>>(),
    })
}

pub(crate) fn small_versions(report: &SmallVersionReport) -> Value {
    json!({
        "rows_rewritten": report.rows_rewritten(),
        "rows_relocated": report.rows_relocated(),
        "pairs": report
            .pairs
            .iter()
            .map(|pair| {
                let mut value = scope_json(&pair.scope);
                value["ceiling"] = json!(pair.ceiling);
                value["upper_bound"] = json!(pair.upper_bound);
                value["relocated"] = moves_json(&pair.relocated);
                value["rewritten"] = moves_json(&pair.rewritten);
                value
            })
            .collect::<Vec<_>>(),
    })
}

pub(crate) fn integrity(issues: &[IntegrityIssue]) -> Value {
    let items = issues
        .iter()
        .map(|issue| {
            let mut value = scope_json(issue.scope());
            value["kind"] = json!(issue.kind());
            match issue {
                IntegrityIssue::DuplicateVersion {
                    resource_version,
                    rows,
                    ..
                } => {
                    value["resource_version"] = json!(resource_version);
                    value["rows"] = json!(rows);
                }
                IntegrityIssue::DanglingReference {
                    table,
                    guid,
                    previous_resource_version,
                    ..
                } => {
                    value["table"] = json!(table);
                    value["guid"] = json!(guid);
                    value["previous_resource_version"] = json!(previous_resource_version);
                }
                IntegrityIssue::VersionAboveCounter {
                    resource_version,
                    counter,
                    ..
                } => {
                    value["resource_version"] = json!(resource_version);
                    value["counter"] = json!(counter);
                }
                IntegrityIssue::MissingCounter { .. } => {}
                IntegrityIssue::LatestNotDeleted {
                    guid,
                    resource_version,
                    ..
                } => {
                    value["guid"] = json!(guid);
                    value["resource_version"] = json!(resource_version);
                }
            }
            value
        })
        .collect::<Vec<_>>();
    json!({ "clean": issues.is_empty(), "issues": items })
}
