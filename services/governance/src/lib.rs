//! QuickSight Governance Library
//!
//! Manifest-driven sync of users, groups and asset permissions from an
//! identity provider into the analytics platform.

pub mod agents;
pub mod config;
pub mod error;
pub mod identity;
pub mod manifest;
pub mod platform;
pub mod reconcile;

pub use agents::governance::{ApplyConfig, GovernanceAgent, PlanExecutor, RunReport};
pub use config::{GovernanceConfig, OktaConfig};
pub use error::GovernanceError;
pub use reconcile::{ReconcilePolicy, Reconciler};
