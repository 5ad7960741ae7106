#![forbid(unsafe_code)]

use crate::model::HistoryAction;

/// Snowflake epoch (ms) shared by every backend that derives ids from resource versions.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_288_834_974_657;
const SNOWFLAKE_NODE_BITS: u32 = 10;
const SNOWFLAKE_STEP_BITS: u32 = 12;
const SNOWFLAKE_TIME_SHIFT: u32 = SNOWFLAKE_NODE_BITS + SNOWFLAKE_STEP_BITS;

/// Smallest microsecond resource version whose snowflake id has 19 decimal digits.
///
/// Everything at or above this floor sorts lexicographically in key paths the same
/// way it sorts numerically; everything below it does not.
pub const MIN_FIXED_WIDTH_RV: i64 = 1_527_253_553_759_000;

/// Number of decimal digits of a snowflake derived from a version at or above the floor.
pub const FIXED_WIDTH_DIGITS: usize = 19;

pub fn snowflake_from_rv(rv: i64) -> i64 {
    (((rv / 1000) - SNOWFLAKE_EPOCH_MS) << SNOWFLAKE_TIME_SHIFT) + (rv % 1000)
}

pub fn rv_from_snowflake(snowflake: i64) -> i64 {
    let micros = snowflake & ((1 << SNOWFLAKE_STEP_BITS) - 1);
    ((snowflake >> SNOWFLAKE_TIME_SHIFT) + SNOWFLAKE_EPOCH_MS) * 1000 + micros
}

pub fn has_fixed_width(rv: i64) -> bool {
    rv >= MIN_FIXED_WIDTH_RV
}

/// Sortable external key of one history revision:
/// `group/resource/namespace/name/<snowflake>~<status>~<folder>`.
pub fn key_path(
    group: &str,
    resource: &str,
    namespace: &str,
    name: &str,
    rv: i64,
    action: HistoryAction,
    folder: &str,
) -> String {
    format!(
        "{group}/{resource}/{namespace}/{name}/{}~{}~{folder}",
        snowflake_from_rv(rv),
        action.as_str()
    )
}
