//! Local Platform Model
//!
//! A file-backed stand-in for the analytics platform's admin API. Assets
//! carry resource permissions the way the platform does (principal ARN plus
//! action list); [`LocalPlatform::current_state`] maps them back to manifest
//! permissions. Operations fail with the same error kinds the real API
//! returns: missing prerequisites are `NotFound`, duplicates `Conflict`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::actions::{actions_for, group_principal, parse_group_principal, permission_from_actions};
use super::{AssetRef, GroupRef, PlatformApplier, PlatformState, PlatformStateSource};
use crate::error::{ApplyError, PlatformError};
use crate::manifest::{AssetCategory, AssetRecord, UserRecord};
use crate::reconcile::Operation;

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

/// One principal's actions on an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub principal: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAsset {
    pub id: String,
    pub name: String,
    pub category: AssetCategory,
    #[serde(default)]
    pub permissions: Vec<ResourcePermission>,
}

/// Entire platform contents, as persisted in the state file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformModel {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_account_id")]
    pub account_id: String,
    #[serde(default)]
    pub namespaces: BTreeSet<String>,
    #[serde(default)]
    pub groups: BTreeSet<GroupRef>,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub assets: Vec<LocalAsset>,
}

impl Default for PlatformModel {
    fn default() -> Self {
        Self {
            region: default_region(),
            account_id: default_account_id(),
            namespaces: BTreeSet::new(),
            groups: BTreeSet::new(),
            users: Vec::new(),
            assets: Vec::new(),
        }
    }
}

impl PlatformModel {
    /// Register an asset with no permissions
    pub fn with_asset(mut self, id: &str, name: &str, category: AssetCategory) -> Self {
        self.assets.push(LocalAsset {
            id: id.to_string(),
            name: name.to_string(),
            category,
            permissions: Vec::new(),
        });
        self
    }

    fn principal(&self, namespace: &str, group: &str) -> String {
        group_principal(&self.region, &self.account_id, namespace, group)
    }

    fn require_namespace(&self, namespace: &str) -> Result<(), ApplyError> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(ApplyError::not_found(format!("namespace {namespace} does not exist")))
        }
    }

    fn require_groups<'a>(
        &self,
        namespace: &str,
        groups: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), ApplyError> {
        for group in groups {
            if !self.groups.contains(&GroupRef::new(namespace, group.as_str())) {
                return Err(ApplyError::not_found(format!(
                    "group {namespace}/{group} does not exist"
                )));
            }
        }
        Ok(())
    }

    fn user_index(&self, namespace: &str, username: &str) -> Option<usize> {
        self.users
            .iter()
            .position(|u| u.namespace == namespace && u.username == username)
    }

    fn asset_mut(&mut self, grant: &AssetRecord) -> Result<&mut LocalAsset, ApplyError> {
        self.assets
            .iter_mut()
            .find(|a| a.name == grant.name && a.category == grant.category)
            .ok_or_else(|| {
                ApplyError::not_found(format!("{} asset {} does not exist", grant.category, grant.name))
            })
    }

    fn set_grant(&mut self, grant: &AssetRecord) -> Result<(), ApplyError> {
        self.require_namespace(&grant.namespace)?;
        self.require_groups(&grant.namespace, [&grant.group])?;
        let principal = self.principal(&grant.namespace, &grant.group);
        let actions: Vec<String> = actions_for(grant.category, grant.permission)
            .iter()
            .map(|a| a.to_string())
            .collect();

        let asset = self.asset_mut(grant)?;
        match asset.permissions.iter_mut().find(|p| p.principal == principal) {
            Some(existing) => existing.actions = actions,
            None => asset.permissions.push(ResourcePermission { principal, actions }),
        }
        Ok(())
    }

    /// Apply one operation to the model
    pub fn apply(&mut self, operation: &Operation) -> Result<(), ApplyError> {
        match operation {
            Operation::CreateNamespace { namespace } => {
                if !self.namespaces.insert(namespace.clone()) {
                    return Err(ApplyError::conflict(format!("namespace {namespace} exists")));
                }
            }
            Operation::CreateGroup { namespace, group } => {
                self.require_namespace(namespace)?;
                if !self.groups.insert(GroupRef::new(namespace.as_str(), group.as_str())) {
                    return Err(ApplyError::conflict(format!("group {namespace}/{group} exists")));
                }
            }
            Operation::CreateUser { user } => {
                self.require_namespace(&user.namespace)?;
                self.require_groups(&user.namespace, &user.groups)?;
                if self.user_index(&user.namespace, &user.username).is_some() {
                    return Err(ApplyError::conflict(format!("user {} exists", user.display_key())));
                }
                self.users.push(user.clone());
            }
            Operation::UpdateUser {
                user,
                add_groups,
                remove_groups,
                ..
            } => {
                self.require_groups(&user.namespace, add_groups)?;
                let index = self
                    .user_index(&user.namespace, &user.username)
                    .ok_or_else(|| ApplyError::not_found(format!("user {} does not exist", user.display_key())))?;
                let current = &mut self.users[index];
                current.groups.retain(|g| !remove_groups.contains(g));
                current.groups.extend(add_groups.iter().cloned());
                current.role = user.role;
                current.email = user.email.clone();
            }
            Operation::DeleteUser { namespace, username } => {
                let index = self
                    .user_index(namespace, username)
                    .ok_or_else(|| ApplyError::not_found(format!("user {namespace}/{username} does not exist")))?;
                self.users.remove(index);
            }
            Operation::DeleteGroup { namespace, group } => {
                if !self.groups.remove(&GroupRef::new(namespace.as_str(), group.as_str())) {
                    return Err(ApplyError::not_found(format!(
                        "group {namespace}/{group} does not exist"
                    )));
                }
                for user in self.users.iter_mut().filter(|u| &u.namespace == namespace) {
                    user.groups.remove(group);
                }
                let principal = self.principal(namespace, group);
                for asset in &mut self.assets {
                    asset.permissions.retain(|p| p.principal != principal);
                }
            }
            Operation::CreateGrant { grant } | Operation::UpdateGrant { grant, .. } => {
                self.set_grant(grant)?;
            }
            Operation::RevokeGrant { grant } => {
                let principal = self.principal(&grant.namespace, &grant.group);
                let asset = self.asset_mut(grant)?;
                let before = asset.permissions.len();
                asset.permissions.retain(|p| p.principal != principal);
                if asset.permissions.len() == before {
                    return Err(ApplyError::not_found(format!(
                        "no grant for {} on {}",
                        principal, grant.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Project the model into reconciler input
    pub fn state(&self, namespace: Option<&str>) -> PlatformState {
        let in_scope = |ns: &str| namespace.map_or(true, |wanted| wanted == ns);

        let mut grants = Vec::new();
        for asset in &self.assets {
            for permission in &asset.permissions {
                let Some((ns, group)) = parse_group_principal(&permission.principal) else {
                    continue;
                };
                if !in_scope(ns) {
                    continue;
                }
                match permission_from_actions(asset.category, &permission.actions) {
                    Some(level) => grants.push(AssetRecord {
                        name: asset.name.clone(),
                        category: asset.category,
                        namespace: ns.to_string(),
                        group: group.to_string(),
                        permission: level,
                    }),
                    None => warn!(
                        asset = %asset.name,
                        principal = %permission.principal,
                        "Unrecognized action set, treating as no grant"
                    ),
                }
            }
        }

        PlatformState {
            namespaces: self.namespaces.iter().filter(|ns| in_scope(ns.as_str())).cloned().collect(),
            groups: self.groups.iter().filter(|g| in_scope(g.namespace.as_str())).cloned().collect(),
            users: self.users.iter().filter(|u| in_scope(u.namespace.as_str())).cloned().collect(),
            grants,
            assets: self
                .assets
                .iter()
                .map(|a| AssetRef {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    category: a.category,
                })
                .collect(),
        }
    }
}

/// Platform backed by a [`PlatformModel`], optionally persisted to disk
pub struct LocalPlatform {
    model: RwLock<PlatformModel>,
    path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl LocalPlatform {
    pub fn in_memory(model: PlatformModel) -> Self {
        Self {
            model: RwLock::new(model),
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Load the state file, starting empty when it does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PlatformError> {
        let path = path.as_ref().to_path_buf();
        let model = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = ?path, "No platform state file, starting empty");
                PlatformModel::default()
            }
            Err(source) => return Err(PlatformError::Io { path, source }),
        };

        Ok(Self {
            model: RwLock::new(model),
            path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    /// Copy of the current model
    pub async fn model(&self) -> PlatformModel {
        self.model.read().await.clone()
    }

    /// Write the model to its state file, if any (temp file + rename)
    pub async fn persist(&self) -> Result<(), PlatformError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(&*self.model.read().await)?;

        let io_err = |source| PlatformError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

        debug!(path = ?path, "Persisted platform state");
        Ok(())
    }
}

#[async_trait]
impl PlatformStateSource for LocalPlatform {
    async fn current_state(&self, namespace: Option<&str>) -> Result<PlatformState, PlatformError> {
        Ok(self.model.read().await.state(namespace))
    }
}

#[async_trait]
impl PlatformApplier for LocalPlatform {
    async fn apply(&self, operation: &Operation) -> Result<(), ApplyError> {
        self.model.write().await.apply(operation)
    }

    async fn flush(&self) -> Result<(), PlatformError> {
        self.persist().await
    }
}
