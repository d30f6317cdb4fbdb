//! Governance Manifests
//!
//! The two declarative sources of truth:
//!
//! - **User manifest**: built from identity-provider profiles, one record per
//!   platform user (namespace, groups, role, email).
//! - **Asset manifest**: authored by an administrator, one record per group
//!   permission on a named asset.
//!
//! Manifests are versioned as a whole and never edited in place; see
//! [`store`] for how snapshots are kept.

pub mod builder;
pub mod store;
mod types;

pub use builder::{AttributeMapping, BuildOutcome, ManifestBuilder, RejectedRecord};
pub use store::{FileManifestStore, InMemoryManifestStore, ManifestStore, SnapshotPair};
pub use types::*;
