#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    Cancelled,
    LockPoisoned,
    UnknownAction(i64),
    MissingCounter {
        group: String,
        resource: String,
    },
    VersionSpaceExhausted {
        group: String,
        resource: String,
        assigned: usize,
        needed: usize,
        upper_bound: i64,
    },
    Pair {
        operation: &'static str,
        group: String,
        resource: String,
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Wraps a failure with the pair and operation it happened in.
    pub(crate) fn in_pair(self, operation: &'static str, group: &str, resource: &str) -> Self {
        match self {
            Self::Pair { .. } => self,
            other => Self::Pair {
                operation,
                group: group.to_string(),
                resource: resource.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping pair context.
    pub fn root(&self) -> &StoreError {
        match self {
            Self::Pair { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.root() {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQL",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Cancelled => "CANCELLED",
            Self::LockPoisoned => "LOCK_POISONED",
            Self::UnknownAction(_) => "UNKNOWN_ACTION",
            Self::MissingCounter { .. } => "MISSING_COUNTER",
            Self::VersionSpaceExhausted { .. } => "VERSION_SPACE_EXHAUSTED",
            Self::Pair { .. } => "PAIR",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::LockPoisoned => write!(f, "allocator state lock poisoned"),
            Self::UnknownAction(code) => write!(f, "unknown history action {code}"),
            Self::MissingCounter { group, resource } => write!(
                f,
                "no resource_version counter for group={group} resource={resource}"
            ),
            Self::VersionSpaceExhausted {
                group,
                resource,
                assigned,
                needed,
                upper_bound,
            } => write!(
                f,
                "resource versions exhausted below {upper_bound} (group={group}, resource={resource}, assigned={assigned}, needed={needed})"
            ),
            Self::Pair {
                operation,
                group,
                resource,
                source,
            } => write!(
                f,
                "{operation} (group={group}, resource={resource}): {source}"
            ),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Sql(err) => Some(err),
            Self::Pair { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
