#![forbid(unsafe_code)]

use super::*;
use rv_core::ids::ResourceKey;
use rv_core::model::HistoryAction;
use std::collections::HashMap;

fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|a| a.to_string()).collect()
}

fn parse_with_env(raw: &[&str], env: &[(&str, &str)]) -> Result<Option<RunnerConfig>, String> {
    let env = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<HashMap<_, _>>();
    parse_args_from(&args(raw), |name| env.get(name).cloned())
}

fn parse(raw: &[&str]) -> Result<Option<RunnerConfig>, String> {
    parse_with_env(raw, &[])
}

#[test]
fn flags_override_env_fallbacks() {
    let cfg = parse_with_env(
        &["--storage-dir", "/tmp/flag", "--batch-size", "25"],
        &[("RV_STORAGE_DIR", "/tmp/env"), ("RV_BATCH_SIZE", "7"), ("RV_FLOOR", "42")],
    )
    .expect("valid args")
    .expect("not help");
    assert_eq!(cfg.storage_dir, PathBuf::from("/tmp/flag"));
    assert_eq!(cfg.repair.batch_size, 25);
    assert_eq!(cfg.repair.floor, 42);
    assert!(cfg.runs(Step::Drift));
    assert!(cfg.runs(Step::SmallVersions));
}

#[test]
fn only_selects_a_single_step() {
    let cfg = parse(&["--storage-dir", "d", "--only", "small-versions", "--dry-run", "--verify"])
        .expect("valid args")
        .expect("not help");
    assert!(!cfg.runs(Step::Drift));
    assert!(cfg.runs(Step::SmallVersions));
    assert!(cfg.dry_run);
    assert!(cfg.verify);
    assert_eq!(cfg.repair.floor, rv_core::MIN_FIXED_WIDTH_RV);
}

#[test]
fn usage_errors_are_reported() {
    assert!(parse(&[]).expect_err("storage dir is required").contains("--storage-dir"));
    assert!(parse(&["--storage-dir"]).is_err());
    assert!(parse(&["--storage-dir", "d", "--only", "everything"]).is_err());
    assert!(parse(&["--storage-dir", "d", "--batch-size", "0"]).is_err());
    assert!(parse(&["--storage-dir", "d", "--batch-size", "5000"]).is_err());
    assert!(parse(&["--storage-dir", "d", "--floor", "soon"]).is_err());
    assert!(
        parse(&["--storage-dir", "d", "--bogus"])
            .expect_err("unknown flag")
            .starts_with("Unknown arg: --bogus")
    );
    assert_eq!(parse(&["--storage-dir", "d", "-h"]), Ok(None));
}

#[test]
fn run_reports_each_step_as_json() {
    let mut store = SqliteStore::open_in_memory().expect("in-memory store");
    let conn = store.connection();
    let key = ResourceKey::try_new("default", "dashboard.grafana.app", "dashboards", "gone")
        .expect("valid key");
    conn.execute(
        "INSERT INTO resource_history(guid, resource_version, \"group\", \"resource\", namespace, name, \
           value, action, label_set, previous_resource_version, folder, generation, key_path) \
         VALUES ('g-1', 5, ?1, ?2, ?3, ?4, '{}', ?5, NULL, 0, '', 1, ?6)",
        seed_params(&key),
    )
    .expect("seed history");
    conn.execute(
        "INSERT INTO resource_version(\"group\", \"resource\", resource_version) VALUES (?1, ?2, ?3)",
        (key.group(), key.resource(), rv_core::MIN_FIXED_WIDTH_RV + 100),
    )
    .expect("seed counter");

    let mut cfg = parse(&["--storage-dir", "unused", "--dry-run", "--verify"])
        .expect("valid args")
        .expect("not help");
    let ctx = Context::background();
    let dry = run(&mut store, &cfg, &ctx).expect("dry run");
    assert_eq!(dry.report["drift"]["rows"], json!(1));
    assert_eq!(dry.report["small_versions"]["rows"], json!(1));
    assert_eq!(dry.report["integrity"]["clean"], json!(false));
    assert!(dry.integrity_issues > 0);

    cfg.dry_run = false;
    let repaired = run(&mut store, &cfg, &ctx).expect("repair run");
    assert_eq!(repaired.report["drift"]["rows_repaired"], json!(1));
    assert_eq!(repaired.report["small_versions"]["rows_rewritten"], json!(2));
    assert_eq!(repaired.report["integrity"]["clean"], json!(true));
    assert_eq!(repaired.integrity_issues, 0);
}

fn seed_params(key: &ResourceKey) -> (String, String, String, String, i64, String) {
    (
        key.group().to_string(),
        key.resource().to_string(),
        key.namespace().to_string(),
        key.name().to_string(),
        HistoryAction::Created.code(),
        rv_core::key_path(
            key.group(),
            key.resource(),
            key.namespace(),
            key.name(),
            5,
            HistoryAction::Created,
            "",
        ),
    )
}
