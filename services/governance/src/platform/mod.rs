//! Analytics Platform Interface
//!
//! The reconciler never talks to the platform: it receives a
//! [`PlatformState`] snapshot and returns a plan. Reading that snapshot and
//! applying operations go through the two traits here.
//!
//! ## Implementations
//!
//! - [`LocalPlatform`]: platform model held in memory, optionally persisted
//!   to a JSON state file. Used for offline runs and tests.

pub mod actions;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ApplyError, PlatformError};
use crate::manifest::{AssetCategory, AssetRecord, UserRecord};
use crate::reconcile::Operation;

pub use local::{LocalAsset, LocalPlatform, PlatformModel, ResourcePermission};

/// A group, identified within its namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupRef {
    pub namespace: String,
    pub name: String,
}

impl GroupRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// An asset known to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub name: String,
    pub category: AssetCategory,
}

/// Observable platform state at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformState {
    pub namespaces: BTreeSet<String>,
    pub groups: BTreeSet<GroupRef>,
    pub users: Vec<UserRecord>,
    /// Group permissions on assets, expressed as manifest records
    pub grants: Vec<AssetRecord>,
    /// Asset catalog used to resolve manifest names
    pub assets: Vec<AssetRef>,
}

impl PlatformState {
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    /// First asset with this name and category; names are not unique on
    /// the platform, the first match is governed
    pub fn find_asset(&self, name: &str, category: AssetCategory) -> Option<&AssetRef> {
        self.assets
            .iter()
            .find(|a| a.name == name && a.category == category)
    }

    /// Whether any current grant is held by the group
    pub fn group_has_grants(&self, group: &GroupRef) -> bool {
        self.grants
            .iter()
            .any(|g| g.namespace == group.namespace && g.group == group.name)
    }
}

/// Read access to current platform state
#[async_trait]
pub trait PlatformStateSource: Send + Sync {
    /// Snapshot of the platform, optionally restricted to one namespace.
    /// The asset catalog is always returned in full.
    async fn current_state(&self, namespace: Option<&str>) -> Result<PlatformState, PlatformError>;
}

/// Executes single operations against the platform's admin interface
#[async_trait]
pub trait PlatformApplier: Send + Sync {
    async fn apply(&self, operation: &Operation) -> Result<(), ApplyError>;

    /// Make applied changes durable; called once after a run's last batch
    async fn flush(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Permission;

    #[test]
    fn test_find_asset_matches_category() {
        let state = PlatformState {
            assets: vec![
                AssetRef {
                    id: "ds-1".to_string(),
                    name: "sales".to_string(),
                    category: AssetCategory::Dataset,
                },
                AssetRef {
                    id: "db-1".to_string(),
                    name: "sales".to_string(),
                    category: AssetCategory::Dashboard,
                },
            ],
            ..Default::default()
        };

        assert_eq!(state.find_asset("sales", AssetCategory::Dashboard).unwrap().id, "db-1");
        assert!(state.find_asset("sales", AssetCategory::Theme).is_none());
    }

    #[test]
    fn test_group_has_grants() {
        let state = PlatformState {
            grants: vec![AssetRecord {
                name: "sales".to_string(),
                category: AssetCategory::Dataset,
                namespace: "default".to_string(),
                group: "analysts".to_string(),
                permission: Permission::Read,
            }],
            ..Default::default()
        };

        assert!(state.group_has_grants(&GroupRef::new("default", "analysts")));
        assert!(!state.group_has_grants(&GroupRef::new("other", "analysts")));
    }
}
