//! Agent modules for the governance service
//!
//! - `governance`: manifest ingestion, reconciliation and plan execution

pub mod governance;

pub use governance::GovernanceAgent;
