//! Run Reports
//!
//! Every run, dry or not, ends with a [`RunReport`]: counts first, then the
//! itemized operation outcomes, rejected records and flagged entities.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::applier::{OperationOutcome, OperationStatus};
use crate::manifest::{ManifestKind, RejectedRecord};
use crate::reconcile::FlaggedEntity;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub planned: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rejected: usize,
    pub flagged: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub kind: ManifestKind,
    /// Version of the snapshot that was reconciled, if any
    pub manifest_version: Option<u64>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    /// Identity profiles skipped as inactive
    #[serde(skip_serializing_if = "is_zero")]
    pub inactive: usize,
    pub operations: Vec<OperationOutcome>,
    pub rejected: Vec<RejectedRecord>,
    pub flagged: Vec<FlaggedEntity>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl RunReport {
    pub fn start(kind: ManifestKind, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            manifest_version: None,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            counts: RunCounts::default(),
            inactive: 0,
            operations: Vec::new(),
            rejected: Vec::new(),
            flagged: Vec::new(),
        }
    }

    /// Stamp the finish time and compute counts from the itemized lists
    pub fn finish(mut self) -> Self {
        let mut counts = RunCounts {
            rejected: self.rejected.len(),
            flagged: self.flagged.len(),
            ..Default::default()
        };
        for outcome in &self.operations {
            match outcome.status {
                OperationStatus::Planned => counts.planned += 1,
                OperationStatus::Applied => counts.applied += 1,
                OperationStatus::Failed { .. } => counts.failed += 1,
                OperationStatus::SkippedDueToDependency { .. } => counts.skipped += 1,
                OperationStatus::Cancelled => counts.cancelled += 1,
            }
        }
        self.counts = counts;
        self.finished_at = Some(Utc::now());
        self.log_summary();
        self
    }

    /// No operation failed, was skipped or was cancelled
    pub fn is_clean(&self) -> bool {
        self.counts.failed == 0 && self.counts.skipped == 0 && self.counts.cancelled == 0
    }

    fn log_summary(&self) {
        let c = &self.counts;
        if self.is_clean() {
            info!(
                run_id = %self.run_id,
                kind = %self.kind,
                version = ?self.manifest_version,
                dry_run = self.dry_run,
                planned = c.planned,
                applied = c.applied,
                rejected = c.rejected,
                flagged = c.flagged,
                "Governance run complete"
            );
        } else {
            warn!(
                run_id = %self.run_id,
                kind = %self.kind,
                version = ?self.manifest_version,
                applied = c.applied,
                failed = c.failed,
                skipped = c.skipped,
                cancelled = c.cancelled,
                "Governance run completed with errors"
            );
        }
    }
}
