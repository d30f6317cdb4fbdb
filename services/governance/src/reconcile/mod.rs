//! Reconciliation
//!
//! Turns (desired manifest, previous manifest, platform state) into an
//! ordered [`OperationPlan`], plus the entities it chose not to touch.

pub mod diff;
pub mod plan;
pub mod reconciler;

pub use diff::{diff, diff_by, Change, Diff, Keyed};
pub use plan::{Action, Operation, OperationPlan, Phase, Target};
pub use reconciler::{FlagReason, FlaggedEntity, ReconcilePolicy, Reconciler, Reconciliation};
