//! Identity and Permission Governance Agent
//!
//! Keeps the analytics platform's namespaces, groups, users and asset grants
//! in line with two manifests: users ingested from the identity provider and
//! asset grants authored by an administrator.
//!
//! ## Flow
//!
//! 1. **Ingest**: identity source → [`ManifestBuilder`](crate::manifest::ManifestBuilder) → store
//! 2. **Plan**: stored snapshot pair + platform state → [`Reconciler`](crate::reconcile::Reconciler)
//! 3. **Apply**: [`PlanExecutor`] runs namespace batches with retries and
//!    dependency skipping
//! 4. **Report**: every run returns a [`RunReport`]
//!
//! ## Safety
//!
//! - User and group deletion are off unless enabled; undesired entities are
//!   flagged in the report instead
//! - One run per manifest kind at a time

pub mod applier;
mod orchestrator;
pub mod report;

pub use applier::{ApplyConfig, OperationOutcome, OperationStatus, PlanExecutor};
pub use orchestrator::{GovernanceAgent, Ingestion};
pub use report::{RunCounts, RunReport};
