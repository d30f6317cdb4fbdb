//! Plan Executor
//!
//! Applies an [`OperationPlan`] through a [`PlatformApplier`]. Namespaces are
//! independent batches run with bounded concurrency; inside a batch the plan
//! order is kept and failures propagate to dependents:
//!
//! - failed CREATE Namespace: every later operation in the namespace is skipped
//! - failed CREATE Group: later operations that need that group are skipped
//!
//! Throttling and transport errors are retried with linear backoff. Nothing
//! is rolled back.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ApplyError, PlatformError};
use crate::platform::PlatformApplier;
use crate::reconcile::{Operation, OperationPlan};

/// Retry and concurrency settings for plan execution
#[derive(Debug, Clone)]
pub struct ApplyConfig {
    /// Attempts per operation, including the first
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
    pub max_parallel_namespaces: usize,
    /// Pause after a namespace is created, before its groups
    pub namespace_ready_delay: Duration,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            max_parallel_namespaces: 4,
            namespace_ready_delay: Duration::ZERO,
        }
    }
}

/// Final state of one planned operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    /// Dry run; not sent to the platform
    Planned,
    Applied,
    Failed { error: ApplyError },
    /// A prerequisite at plan index `failed_index` failed
    SkippedDueToDependency { failed_index: usize },
    /// The run was cancelled before this namespace started
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Position in the plan
    pub index: usize,
    pub operation: Operation,
    #[serde(flatten)]
    pub status: OperationStatus,
    pub attempts: u32,
}

impl OperationOutcome {
    fn new(index: usize, operation: &Operation, status: OperationStatus, attempts: u32) -> Self {
        Self {
            index,
            operation: operation.clone(),
            status,
            attempts,
        }
    }

    /// Outcomes for a plan that is only reported, never applied
    pub fn planned(plan: &OperationPlan) -> Vec<Self> {
        plan.iter()
            .enumerate()
            .map(|(index, op)| Self::new(index, op, OperationStatus::Planned, 0))
            .collect()
    }
}

/// Executes plans against a platform
pub struct PlanExecutor {
    applier: Arc<dyn PlatformApplier>,
    config: ApplyConfig,
}

impl PlanExecutor {
    pub fn new(applier: Arc<dyn PlatformApplier>, config: ApplyConfig) -> Self {
        Self { applier, config }
    }

    /// Same platform, different settings
    pub fn reconfigure(self, config: ApplyConfig) -> Self {
        Self { config, ..self }
    }

    /// Make applied changes durable
    pub async fn flush(&self) -> Result<(), PlatformError> {
        self.applier.flush().await
    }

    /// Apply every operation, returning one outcome per plan entry in plan
    /// order. Cancellation is observed between namespace batches.
    pub async fn execute(&self, plan: &OperationPlan, cancel: &CancellationToken) -> Vec<OperationOutcome> {
        let batches = plan.by_namespace();
        info!(
            operations = plan.len(),
            namespaces = batches.len(),
            parallelism = self.config.max_parallel_namespaces,
            "Applying operation plan"
        );

        let mut outcomes: Vec<OperationOutcome> = stream::iter(batches)
            .map(|(namespace, ops)| self.run_batch(namespace, ops, cancel))
            .buffer_unordered(self.config.max_parallel_namespaces.max(1))
            .flat_map(stream::iter)
            .collect()
            .await;

        outcomes.sort_by_key(|o| o.index);
        outcomes
    }

    async fn run_batch(
        &self,
        namespace: &str,
        ops: Vec<(usize, &Operation)>,
        cancel: &CancellationToken,
    ) -> Vec<OperationOutcome> {
        if cancel.is_cancelled() {
            warn!(namespace, operations = ops.len(), "Run cancelled, namespace not started");
            return ops
                .into_iter()
                .map(|(index, op)| OperationOutcome::new(index, op, OperationStatus::Cancelled, 0))
                .collect();
        }

        let mut outcomes = Vec::with_capacity(ops.len());
        let mut failed_namespace: Option<usize> = None;
        let mut failed_groups: HashMap<&str, usize> = HashMap::new();

        for (index, op) in ops {
            let blocked_by = failed_namespace.or_else(|| {
                op.required_groups()
                    .iter()
                    .find_map(|g| failed_groups.get(g).copied())
            });
            if let Some(failed_index) = blocked_by {
                debug!(index, operation = %op, failed_index, "Skipping dependent operation");
                outcomes.push(OperationOutcome::new(
                    index,
                    op,
                    OperationStatus::SkippedDueToDependency { failed_index },
                    0,
                ));
                continue;
            }

            let (result, attempts) = self.apply_with_retry(op).await;
            let status = match result {
                Ok(()) => {
                    info!(index, operation = %op, attempts, "Applied operation");
                    if matches!(op, Operation::CreateNamespace { .. })
                        && !self.config.namespace_ready_delay.is_zero()
                    {
                        tokio::time::sleep(self.config.namespace_ready_delay).await;
                    }
                    OperationStatus::Applied
                }
                Err(error) => {
                    warn!(index, operation = %op, attempts, error = %error, "Operation failed");
                    match op {
                        Operation::CreateNamespace { .. } => failed_namespace = Some(index),
                        Operation::CreateGroup { group, .. } => {
                            failed_groups.insert(group.as_str(), index);
                        }
                        _ => {}
                    }
                    OperationStatus::Failed { error }
                }
            };
            outcomes.push(OperationOutcome::new(index, op, status, attempts));
        }

        outcomes
    }

    async fn apply_with_retry(&self, op: &Operation) -> (Result<(), ApplyError>, u32) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.applier.apply(op).await {
                Ok(()) => return (Ok(()), attempt),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let backoff = self.config.retry_backoff * attempt;
                    debug!(operation = %op, attempt, ?backoff, error = %error, "Retrying operation");
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => return (Err(error), attempt),
            }
        }
    }
}
