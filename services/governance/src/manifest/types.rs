//! Manifest Types
//!
//! Desired-state records for users and asset grants, the two manifest
//! documents that carry them, and the versioned snapshot the store keeps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::ValidationError;

/// Maximum namespace name length accepted by the platform
const MAX_NAMESPACE_LEN: usize = 64;

/// Maximum group or asset name length accepted by the platform
const MAX_NAME_LEN: usize = 128;

/// The two independent manifest authorities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    /// Ingested from the identity provider
    Users,
    /// Authored by an administrator
    Assets,
}

impl ManifestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestKind::Users => "users",
            ManifestKind::Assets => "assets",
        }
    }
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform user role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Author,
    Reader,
}

impl Role {
    fn rank(&self) -> u8 {
        match self {
            Role::Reader => 0,
            Role::Author => 1,
            Role::Admin => 2,
        }
    }

    /// True when moving from `previous` to `self` loses capabilities
    pub fn is_downgrade_from(&self, previous: Role) -> bool {
        self.rank() < previous.rank()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "ADMIN"),
            Role::Author => write!(f, "AUTHOR"),
            Role::Reader => write!(f, "READER"),
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "AUTHOR" => Ok(Role::Author),
            "READER" => Ok(Role::Reader),
            _ => Err(ValidationError::InvalidRole {
                value: s.to_string(),
            }),
        }
    }
}

/// Kind of governed asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetCategory {
    #[serde(alias = "dataset")]
    Dataset,
    #[serde(alias = "dashboard")]
    Dashboard,
    #[serde(alias = "theme")]
    Theme,
    #[serde(alias = "analysis", alias = "analyses")]
    Analysis,
    #[serde(alias = "datasource", alias = "data_source")]
    DataSource,
}

impl std::fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetCategory::Dataset => write!(f, "Dataset"),
            AssetCategory::Dashboard => write!(f, "Dashboard"),
            AssetCategory::Theme => write!(f, "Theme"),
            AssetCategory::Analysis => write!(f, "Analysis"),
            AssetCategory::DataSource => write!(f, "DataSource"),
        }
    }
}

/// Permission level of a group on an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Read,
    Write,
    Owner,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Read => write!(f, "READ"),
            Permission::Write => write!(f, "WRITE"),
            Permission::Owner => write!(f, "OWNER"),
        }
    }
}

/// Desired platform user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub namespace: String,
    /// Accepts a JSON array or a comma-separated string
    #[serde(deserialize_with = "deserialize_groups")]
    pub groups: BTreeSet<String>,
    pub role: Role,
    pub email: String,
}

impl UserRecord {
    /// Display key used in logs and reports
    pub fn display_key(&self) -> String {
        format!("{}/{}", self.namespace, self.username)
    }

    /// Check the record against the platform's naming rules
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("username", &self.username)?;
        validate_namespace(&self.namespace)?;
        require("email", &self.email)?;
        if !self.email.contains('@') {
            return Err(ValidationError::InvalidEmail {
                value: self.email.clone(),
            });
        }
        if self.groups.is_empty() {
            return Err(ValidationError::NoGroups);
        }
        for group in &self.groups {
            validate_name("group", group)?;
        }
        Ok(())
    }
}

/// Desired grant of a permission on an asset to a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub name: String,
    pub category: AssetCategory,
    pub namespace: String,
    pub group: String,
    pub permission: Permission,
}

impl AssetRecord {
    pub fn display_key(&self) -> String {
        format!(
            "{}:{} -> {}/{}",
            self.category, self.name, self.namespace, self.group
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("asset name", &self.name)?;
        validate_namespace(&self.namespace)?;
        validate_name("group", &self.group)
    }
}

/// A user the identity provider still lists but whose profile was
/// rejected. Its platform copy is left as is until the profile is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldUser {
    pub username: String,
    pub namespace: String,
    #[serde(default, deserialize_with = "deserialize_groups")]
    pub groups: BTreeSet<String>,
}

/// User manifest document: `{"Users": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserManifest {
    #[serde(rename = "Users", alias = "users")]
    pub users: Vec<UserRecord>,
    #[serde(rename = "Held", alias = "held", default, skip_serializing_if = "Vec::is_empty")]
    pub held: Vec<HeldUser>,
}

impl UserManifest {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self {
            users,
            held: Vec::new(),
        }
    }
}

/// Asset manifest document: `{"Assets": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetManifest {
    #[serde(rename = "Assets", alias = "assets")]
    pub assets: Vec<AssetRecord>,
}

impl AssetManifest {
    pub fn new(assets: Vec<AssetRecord>) -> Self {
        Self { assets }
    }
}

/// Either manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Manifest {
    Users(UserManifest),
    Assets(AssetManifest),
}

impl Manifest {
    pub fn kind(&self) -> ManifestKind {
        match self {
            Manifest::Users(_) => ManifestKind::Users,
            Manifest::Assets(_) => ManifestKind::Assets,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Manifest::Users(m) => m.users.len(),
            Manifest::Assets(m) => m.assets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_users(&self) -> Option<&UserManifest> {
        match self {
            Manifest::Users(m) => Some(m),
            Manifest::Assets(_) => None,
        }
    }

    pub fn as_assets(&self) -> Option<&AssetManifest> {
        match self {
            Manifest::Assets(m) => Some(m),
            Manifest::Users(_) => None,
        }
    }
}

impl From<UserManifest> for Manifest {
    fn from(manifest: UserManifest) -> Self {
        Manifest::Users(manifest)
    }
}

impl From<AssetManifest> for Manifest {
    fn from(manifest: AssetManifest) -> Self {
        Manifest::Assets(manifest)
    }
}

/// An immutable, versioned manifest as kept by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub manifest: Manifest,
}

impl Snapshot {
    pub fn kind(&self) -> ManifestKind {
        self.manifest.kind()
    }
}

/// Split a department attribute into group names
pub fn split_groups(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GroupsRepr {
    List(Vec<String>),
    Joined(String),
}

fn deserialize_groups<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match GroupsRepr::deserialize(deserializer)? {
        GroupsRepr::List(groups) => groups
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect(),
        GroupsRepr::Joined(raw) => split_groups(&raw),
    })
}

fn require(attribute: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingAttribute {
            attribute: attribute.to_string(),
        });
    }
    Ok(())
}

/// Namespaces are limited to `[A-Za-z0-9._-]`, 1 to 64 characters
pub fn validate_namespace(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_NAMESPACE_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidNamespace {
            value: value.to_string(),
        })
    }
}

fn validate_name(field: &str, value: &str) -> Result<(), ValidationError> {
    let valid = !value.trim().is_empty()
        && value.len() <= MAX_NAME_LEN
        && !value.chars().any(|c| c.is_control() || c == '/');

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidName {
            field: field.to_string(),
            value: value.to_string(),
        })
    }
}
