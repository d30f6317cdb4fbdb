//! Governance Error Types
//!
//! Error taxonomy shared by the builder, store, reconciler and applier.
//! Per-record and per-operation errors are collected into the run report;
//! only [`GovernanceError`] aborts a run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::manifest::ManifestKind;

/// A malformed manifest record. Recovered locally: the record is excluded
/// and reported, the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationError {
    /// A required attribute is absent or blank
    #[error("missing required attribute `{attribute}`")]
    MissingAttribute { attribute: String },

    /// Role is not one of ADMIN, AUTHOR, READER
    #[error("invalid role `{value}`")]
    InvalidRole { value: String },

    /// Namespace name the platform would refuse
    #[error("invalid namespace name `{value}`")]
    InvalidNamespace { value: String },

    /// Group or asset name the platform would refuse
    #[error("invalid {field} `{value}`")]
    InvalidName { field: String, value: String },

    #[error("invalid email address `{value}`")]
    InvalidEmail { value: String },

    /// Department attribute produced no group names
    #[error("record has no groups")]
    NoGroups,

    /// Same key already appeared earlier in the manifest
    #[error("duplicate record for `{key}`")]
    Duplicate { key: String },

    /// Grant on an asset the platform does not know by name
    #[error("unknown {category} asset `{name}`")]
    UnknownAsset { name: String, category: String },
}

/// Identity source failure. Surfaced to the caller; the run for that
/// manifest kind is aborted and the stored manifest is left untouched.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network-level failure reaching the identity provider
    #[error("identity provider unreachable: {0}")]
    Transport(String),

    /// Credentials rejected
    #[error("identity provider rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Any other non-success response
    #[error("identity provider returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Response body could not be decoded
    #[error("failed to decode identity provider response: {0}")]
    Decode(String),

    /// Pagination still pointed at a next page after the page limit
    #[error("identity provider listing truncated after {pages} pages")]
    Truncated { pages: usize },

    #[error("failed to read identity export {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Category of a platform rejection, used to decide whether a retry can help
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyErrorKind {
    /// Target already exists
    Conflict,
    /// A prerequisite (namespace, group, asset, user) is missing
    NotFound,
    /// Request refused as invalid
    Rejected,
    /// Rate limited by the platform
    Throttled,
    /// Connection-level failure
    Transport,
}

/// The platform refused a single operation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ApplyError {
    pub kind: ApplyErrorKind,
    pub message: String,
}

impl ApplyError {
    pub fn new(kind: ApplyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApplyErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApplyErrorKind::Conflict, message)
    }

    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApplyErrorKind::Throttled | ApplyErrorKind::Transport
        )
    }
}

/// Manifest store failure
#[derive(Debug, Error)]
pub enum StoreError {
    /// No snapshot of the requested generation exists yet
    #[error("no {generation} {kind} manifest snapshot")]
    NotFound {
        kind: ManifestKind,
        generation: &'static str,
    },

    #[error("manifest store I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Platform state could not be read or persisted
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform state I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("platform state is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Systemic failure that aborts a governance run
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// Another run for the same manifest kind holds the lock
    #[error("a {0} reconciliation run is already in progress")]
    RunInProgress(ManifestKind),

    /// Nothing has been published for this kind yet
    #[error("no current {0} manifest has been published")]
    ManifestMissing(ManifestKind),
}
