#![forbid(unsafe_code)]

use rv_core::ids::GroupResource;
use rv_core::model::HistoryAction;

/// Rows fetched per windowed read and rows written per repair batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairConfig {
    pub batch_size: usize,
    pub floor: i64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            floor: rv_core::MIN_FIXED_WIDTH_RV,
        }
    }
}

impl RepairConfig {
    pub fn validate(&self) -> Result<(), super::StoreError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(super::StoreError::InvalidInput(
                "batch_size must be between 1 and 1000",
            ));
        }
        if self.floor <= 0 {
            return Err(super::StoreError::InvalidInput("floor must be positive"));
        }
        Ok(())
    }
}

/// One immutable revision from `resource_history`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRow {
    pub guid: String,
    pub resource_version: i64,
    pub group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub value: Option<String>,
    pub action: HistoryAction,
    pub label_set: Option<String>,
    pub previous_resource_version: i64,
    pub folder: String,
    pub generation: i64,
    pub key_path: String,
}

impl HistoryRow {
    pub fn key_path_at(&self, rv: i64, action: HistoryAction) -> String {
        rv_core::key_path(
            &self.group,
            &self.resource,
            &self.namespace,
            &self.name,
            rv,
            action,
            &self.folder,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriftPair {
    pub scope: GroupResource,
    /// Orphaned latest revisions, ordered by `(resource_version, namespace, name, guid)`.
    pub rows: Vec<HistoryRow>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriftPairReport {
    pub scope: GroupResource,
    pub upper_bound: i64,
    /// `(original version, assigned deletion version)` in assignment order.
    pub assigned: Vec<(i64, i64)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub pairs: Vec<DriftPairReport>,
}

impl DriftReport {
    pub fn rows_repaired(&self) -> usize {
        self.pairs.iter().map(|pair| pair.assigned.len()).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmallVersionPair {
    pub scope: GroupResource,
    /// Revisions below the floor, ascending by version.
    pub rows: Vec<HistoryRow>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmallVersionPairReport {
    pub scope: GroupResource,
    pub ceiling: i64,
    pub upper_bound: i64,
    /// `(old, new)` for legitimate versions moved out of the rewrite window.
    pub relocated: Vec<(i64, i64)>,
    /// `(old, new)` for versions raised to the floor range.
    pub rewritten: Vec<(i64, i64)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SmallVersionReport {
    pub pairs: Vec<SmallVersionPairReport>,
}

impl SmallVersionReport {
    pub fn rows_rewritten(&self) -> usize {
        self.pairs.iter().map(|pair| pair.rewritten.len()).sum()
    }

    pub fn rows_relocated(&self) -> usize {
        self.pairs.iter().map(|pair| pair.relocated.len()).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityIssue {
    DuplicateVersion {
        scope: GroupResource,
        resource_version: i64,
        rows: i64,
    },
    DanglingReference {
        scope: GroupResource,
        table: &'static str,
        guid: String,
        previous_resource_version: i64,
    },
    VersionAboveCounter {
        scope: GroupResource,
        resource_version: i64,
        counter: i64,
    },
    MissingCounter {
        scope: GroupResource,
    },
    LatestNotDeleted {
        scope: GroupResource,
        guid: String,
        resource_version: i64,
    },
}

impl IntegrityIssue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateVersion { .. } => "duplicate_version",
            Self::DanglingReference { .. } => "dangling_reference",
            Self::VersionAboveCounter { .. } => "version_above_counter",
            Self::MissingCounter { .. } => "missing_counter",
            Self::LatestNotDeleted { .. } => "latest_not_deleted",
        }
    }

    pub fn scope(&self) -> &GroupResource {
        match self {
            Self::DuplicateVersion { scope, .. }
            | Self::DanglingReference { scope, .. }
            | Self::VersionAboveCounter { scope, .. }
            | Self::MissingCounter { scope }
            | Self::LatestNotDeleted { scope, .. } => scope,
        }
    }
}
