#![forbid(unsafe_code)]

pub mod keypath;

pub use keypath::{MIN_FIXED_WIDTH_RV, key_path, rv_from_snowflake, snowflake_from_rv};

pub mod ids {
    use std::fmt;

    const MAX_SEGMENT_LEN: usize = 253;

    /// The `(group, resource)` scope every resource version is unique within.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct GroupResource {
        group: String,
        resource: String,
    }

    impl GroupResource {
        pub fn try_new(
            group: impl Into<String>,
            resource: impl Into<String>,
        ) -> Result<Self, KeyError> {
            let group = group.into();
            let resource = resource.into();
            validate_segment(&group, KeyField::Group)?;
            validate_segment(&resource, KeyField::Resource)?;
            if resource.is_empty() {
                return Err(KeyError::Empty(KeyField::Resource));
            }
            Ok(Self { group, resource })
        }

        pub fn group(&self) -> &str {
            &self.group
        }

        pub fn resource(&self) -> &str {
            &self.resource
        }
    }

    impl fmt::Display for GroupResource {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.group.is_empty() {
                write!(f, "{}", self.resource)
            } else {
                write!(f, "{}.{}", self.resource, self.group)
            }
        }
    }

    /// Identity tuple of one resource: `(namespace, group, resource, name)`.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ResourceKey {
        namespace: String,
        group: String,
        resource: String,
        name: String,
    }

    impl ResourceKey {
        pub fn try_new(
            namespace: impl Into<String>,
            group: impl Into<String>,
            resource: impl Into<String>,
            name: impl Into<String>,
        ) -> Result<Self, KeyError> {
            let scope = GroupResource::try_new(group, resource)?;
            let namespace = namespace.into();
            let name = name.into();
            validate_segment(&namespace, KeyField::Namespace)?;
            validate_segment(&name, KeyField::Name)?;
            if name.is_empty() {
                return Err(KeyError::Empty(KeyField::Name));
            }
            Ok(Self {
                namespace,
                group: scope.group,
                resource: scope.resource,
                name,
            })
        }

        pub fn namespace(&self) -> &str {
            &self.namespace
        }

        pub fn group(&self) -> &str {
            &self.group
        }

        pub fn resource(&self) -> &str {
            &self.resource
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn group_resource(&self) -> GroupResource {
            GroupResource {
                group: self.group.clone(),
                resource: self.resource.clone(),
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum KeyField {
        Namespace,
        Group,
        Resource,
        Name,
    }

    impl KeyField {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Namespace => "namespace",
                Self::Group => "group",
                Self::Resource => "resource",
                Self::Name => "name",
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum KeyError {
        Empty(KeyField),
        TooLong(KeyField),
        InvalidChar { field: KeyField, ch: char },
    }

    impl fmt::Display for KeyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Empty(field) => write!(f, "{} must not be empty", field.as_str()),
                Self::TooLong(field) => write!(f, "{} is too long", field.as_str()),
                Self::InvalidChar { field, ch } => {
                    write!(f, "{} contains invalid char {ch:?}", field.as_str())
                }
            }
        }
    }

    impl std::error::Error for KeyError {}

    // Segments end up inside `/`- and `~`-delimited key paths.
    fn validate_segment(value: &str, field: KeyField) -> Result<(), KeyError> {
        if value.len() > MAX_SEGMENT_LEN {
            return Err(KeyError::TooLong(field));
        }
        for ch in value.chars() {
            if ch == '/' || ch == '~' || ch.is_control() {
                return Err(KeyError::InvalidChar { field, ch });
            }
        }
        Ok(())
    }
}

pub mod model {
    /// Action tag stored on every history revision.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum HistoryAction {
        Created,
        Updated,
        Deleted,
    }

    impl HistoryAction {
        pub fn code(self) -> i64 {
            match self {
                Self::Created => 1,
                Self::Updated => 2,
                Self::Deleted => 3,
            }
        }

        pub fn from_code(code: i64) -> Option<Self> {
            match code {
                1 => Some(Self::Created),
                2 => Some(Self::Updated),
                3 => Some(Self::Deleted),
                _ => None,
            }
        }

        /// Status segment used in key paths.
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Created => "created",
                Self::Updated => "updated",
                Self::Deleted => "deleted",
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ids::{GroupResource, KeyError, KeyField, ResourceKey};
    use super::model::HistoryAction;

    #[test]
    fn resource_key_validation() {
        assert_eq!(
            ResourceKey::try_new("default", "dashboard.grafana.app", "dashboards", "")
                .unwrap_err(),
            KeyError::Empty(KeyField::Name)
        );
        assert_eq!(
            GroupResource::try_new("folder.grafana.app", "").unwrap_err(),
            KeyError::Empty(KeyField::Resource)
        );
        assert_eq!(
            ResourceKey::try_new("a/b", "g", "r", "n").unwrap_err(),
            KeyError::InvalidChar {
                field: KeyField::Namespace,
                ch: '/'
            }
        );
        assert_eq!(
            ResourceKey::try_new("ns", "g", "r", "x~y").unwrap_err(),
            KeyError::InvalidChar {
                field: KeyField::Name,
                ch: '~'
            }
        );

        // Cluster-scoped resources and the core group use empty segments.
        let key = ResourceKey::try_new("", "", "namespaces", "default").expect("valid key");
        assert_eq!(key.group_resource().to_string(), "namespaces");
    }

    #[test]
    fn history_action_codes_round_trip() {
        for action in [
            HistoryAction::Created,
            HistoryAction::Updated,
            HistoryAction::Deleted,
        ] {
            assert_eq!(HistoryAction::from_code(action.code()), Some(action));
        }
        assert_eq!(HistoryAction::from_code(0), None);
        assert_eq!(HistoryAction::from_code(4), None);
        assert_eq!(HistoryAction::Deleted.as_str(), "deleted");
    }
}
