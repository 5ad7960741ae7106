#![forbid(unsafe_code)]

mod report;
#[cfg(test)]
mod tests;

use rv_storage::{Context, RepairConfig, SqliteStore, StoreError};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Drift,
    SmallVersions,
}

impl Step {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "drift" => Some(Self::Drift),
            "small-versions" => Some(Self::SmallVersions),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
struct RunnerConfig {
    storage_dir: PathBuf,
    repair: RepairConfig,
    only: Option<Step>,
    dry_run: bool,
    verify: bool,
}

impl RunnerConfig {
    fn runs(&self, step: Step) -> bool {
        self.only.is_none_or(|only| only == step)
    }
}

fn usage() -> &'static str {
    "rv_repair: repair resource versions in a SQLite resource store\n\n\
USAGE:\n\
  rv_repair --storage-dir DIR [--batch-size N] [--floor RV]\n\
            [--only drift|small-versions] [--dry-run] [--verify]\n\n\
NOTES:\n\
  - Drift repair runs first, then small-version repair.\n\
  - `--dry-run` only reports what each step would touch.\n\
  - `--verify` checks version integrity afterwards; issues exit with 1.\n\
  - Env fallbacks: RV_STORAGE_DIR, RV_BATCH_SIZE, RV_FLOOR. Log filter: RV_LOG or RUST_LOG.\n\
  - The JSON report goes to stdout, logs go to stderr.\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_args() -> Result<Option<RunnerConfig>, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    parse_args_from(&args, env_var)
}

/// `Ok(None)` means help was requested.
fn parse_args_from(
    args: &[String],
    env: impl Fn(&str) -> Option<String>,
) -> Result<Option<RunnerConfig>, String> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        return Ok(None);
    }

    let mut storage_dir: Option<PathBuf> = env("RV_STORAGE_DIR").map(PathBuf::from);
    let mut batch_size: Option<String> = env("RV_BATCH_SIZE");
    let mut floor: Option<String> = env("RV_FLOOR");
    let mut only: Option<Step> = None;
    let mut dry_run = false;
    let mut verify = false;

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--storage-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--storage-dir requires DIR")?;
                storage_dir = Some(PathBuf::from(v));
            }
            "--batch-size" => {
                i += 1;
                let v = args.get(i).ok_or("--batch-size requires N")?;
                batch_size = Some(v.to_string());
            }
            "--floor" => {
                i += 1;
                let v = args.get(i).ok_or("--floor requires RV")?;
                floor = Some(v.to_string());
            }
            "--only" => {
                i += 1;
                let v = args.get(i).ok_or("--only requires STEP")?;
                only = Some(
                    Step::parse(v).ok_or("invalid --only (expected drift|small-versions)")?,
                );
            }
            "--dry-run" => dry_run = true,
            "--verify" => verify = true,
            other => return Err(format!("Unknown arg: {other}\n\n{}", usage())),
        }
        i += 1;
    }

    let storage_dir =
        storage_dir.ok_or_else(|| format!("--storage-dir (or RV_STORAGE_DIR) is required\n\n{}", usage()))?;

    let mut repair = RepairConfig::default();
    if let Some(v) = batch_size {
        repair.batch_size = v
            .trim()
            .parse::<usize>()
            .map_err(|_| "--batch-size must be a positive integer")?;
    }
    if let Some(v) = floor {
        repair.floor = v
            .trim()
            .parse::<i64>()
            .map_err(|_| "--floor must be an integer (microseconds)")?;
    }
    repair.validate().map_err(|e| e.to_string())?;

    Ok(Some(RunnerConfig {
        storage_dir,
        repair,
        only,
        dry_run,
        verify,
    }))
}

fn init_logging() {
    let filter = env_var("RV_LOG")
        .or_else(|| env_var("RUST_LOG"))
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct RunOutcome {
    report: Value,
    integrity_issues: usize,
}

fn run(store: &mut SqliteStore, cfg: &RunnerConfig, ctx: &Context) -> Result<RunOutcome, StoreError> {
    let mut out = Map::new();
    out.insert(
        "storage_dir".to_string(),
        json!(cfg.storage_dir.display().to_string()),
    );
    out.insert("dry_run".to_string(), json!(cfg.dry_run));
    out.insert("batch_size".to_string(), json!(cfg.repair.batch_size));
    out.insert("floor".to_string(), json!(cfg.repair.floor));

    if cfg.runs(Step::Drift) {
        let value = if cfg.dry_run {
            report::drift_detection(&store.find_drift(ctx)?)
        } else {
            report::drift(&store.repair_drift(ctx, &cfg.repair)?)
        };
        out.insert("drift".to_string(), value);
    }

    if cfg.runs(Step::SmallVersions) {
        let value = if cfg.dry_run {
            report::small_version_detection(&store.find_small_versions(ctx, cfg.repair.floor)?)
        } else {
            report::small_versions(&store.repair_small_versions(ctx, &cfg.repair)?)
        };
        out.insert("small_versions".to_string(), value);
    }

    let mut integrity_issues = 0;
    if cfg.verify {
        let issues = store.verify_integrity(ctx)?;
        integrity_issues = issues.len();
        out.insert("integrity".to_string(), report::integrity(&issues));
    }

    Ok(RunOutcome {
        report: Value::Object(out),
        integrity_issues,
    })
}

fn main() {
    let cfg = match parse_args() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            print!("{}", usage());
            return;
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    init_logging();

    let ctx = Context::background();
    let result = SqliteStore::open(&cfg.storage_dir).and_then(|mut store| run(&mut store, &cfg, &ctx));
    match result {
        Ok(outcome) => {
            println!("{:#}", outcome.report);
            if outcome.integrity_issues > 0 {
                tracing::warn!(issues = outcome.integrity_issues, "integrity check found issues");
                std::process::exit(1);
            }
        }
        Err(err) => {
            tracing::error!(code = err.code(), "repair failed");
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
