//! Identity Source Adapters
//!
//! Fetch raw user profiles from the identity provider. The manifest builder
//! only sees [`RawUserProfile`]s; transport, auth and retry policy live here
//! and in the caller's scheduler.
//!
//! ## Sources
//!
//! - [`OktaClient`]: users assigned to an Okta application, via the REST API
//! - [`JsonFileSource`]: a JSON export of the same records, for offline runs

pub mod okta;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::error::AdapterError;

pub use okta::{OktaAppUser, OktaClient};

/// A user as delivered by the identity provider, flattened to string
/// attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl RawUserProfile {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Build a profile from attribute pairs
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            id: None,
            status: None,
            attributes: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Source of raw identity records
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Fetch every user relevant to the platform. Transport and auth
    /// failures surface as [`AdapterError`]; no retries happen here.
    async fn fetch_users(&self) -> Result<Vec<RawUserProfile>, AdapterError>;
}

/// Entry of an exported profile file: either the identity provider's own
/// shape or an already-flattened profile
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportedProfile {
    Okta(OktaAppUser),
    Flat(RawUserProfile),
}

/// Reads raw profiles from a JSON array on disk
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IdentitySource for JsonFileSource {
    async fn fetch_users(&self) -> Result<Vec<RawUserProfile>, AdapterError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| AdapterError::Io {
                path: self.path.clone(),
                source,
            })?;

        let entries: Vec<ExportedProfile> =
            serde_json::from_slice(&bytes).map_err(|e| AdapterError::Decode(e.to_string()))?;

        let profiles: Vec<RawUserProfile> = entries
            .into_iter()
            .map(|entry| match entry {
                ExportedProfile::Okta(user) => user.into_profile(),
                ExportedProfile::Flat(profile) => profile,
            })
            .collect();

        info!(path = ?self.path, count = profiles.len(), "Loaded identity export");
        Ok(profiles)
    }
}
