//! Governance Orchestrator
//!
//! One entry point per trigger: ingest the identity provider's users,
//! publish an asset manifest, reconcile a stored manifest against the
//! platform. Runs of the same manifest kind are mutually exclusive; a second
//! trigger while one is in flight fails fast with `RunInProgress`.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::applier::{ApplyConfig, OperationOutcome, PlanExecutor};
use super::report::RunReport;
use crate::error::GovernanceError;
use crate::identity::IdentitySource;
use crate::manifest::{
    AssetManifest, AttributeMapping, BuildOutcome, Manifest, ManifestBuilder, ManifestKind,
    ManifestStore, RejectedRecord, Snapshot, UserManifest,
};
use crate::platform::{PlatformApplier, PlatformState, PlatformStateSource};
use crate::reconcile::{ReconcilePolicy, Reconciler, Reconciliation};

/// A user manifest built from the identity provider and stored
#[derive(Debug, Clone)]
pub struct Ingestion {
    pub snapshot: Arc<Snapshot>,
    pub rejected: Vec<RejectedRecord>,
    pub inactive: usize,
}

/// Manifest-driven sync between the identity provider and the platform
pub struct GovernanceAgent {
    store: Arc<dyn ManifestStore>,
    state_source: Arc<dyn PlatformStateSource>,
    executor: PlanExecutor,
    builder: ManifestBuilder,
    reconciler: Reconciler,
    users_lock: Mutex<()>,
    assets_lock: Mutex<()>,
}

impl GovernanceAgent {
    pub fn new(
        store: Arc<dyn ManifestStore>,
        state_source: Arc<dyn PlatformStateSource>,
        applier: Arc<dyn PlatformApplier>,
    ) -> Self {
        Self {
            store,
            state_source,
            executor: PlanExecutor::new(applier, ApplyConfig::default()),
            builder: ManifestBuilder::default(),
            reconciler: Reconciler::default(),
            users_lock: Mutex::new(()),
            assets_lock: Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.reconciler = Reconciler::new(policy);
        self
    }

    pub fn with_apply_config(mut self, config: ApplyConfig) -> Self {
        self.executor = self.executor.reconfigure(config);
        self
    }

    pub fn with_mapping(mut self, mapping: AttributeMapping) -> Self {
        self.builder = ManifestBuilder::new(mapping);
        self
    }

    fn try_lock(&self, kind: ManifestKind) -> Result<MutexGuard<'_, ()>, GovernanceError> {
        let lock = match kind {
            ManifestKind::Users => &self.users_lock,
            ManifestKind::Assets => &self.assets_lock,
        };
        lock.try_lock().map_err(|_| {
            warn!(kind = %kind, "Rejecting overlapping governance run");
            GovernanceError::RunInProgress(kind)
        })
    }

    /// Fetch users, build a manifest and store it as the new current
    /// snapshot. An identity source failure leaves the store untouched.
    pub async fn ingest_users(&self, source: &dyn IdentitySource) -> Result<Ingestion, GovernanceError> {
        let _guard = self.try_lock(ManifestKind::Users)?;
        let outcome = self.build(source).await?;
        let snapshot = self.store_users(outcome.manifest).await?;

        Ok(Ingestion {
            snapshot,
            rejected: outcome.rejected,
            inactive: outcome.inactive,
        })
    }

    async fn build(&self, source: &dyn IdentitySource) -> Result<BuildOutcome, GovernanceError> {
        let profiles = source.fetch_users().await?;
        let outcome = self.builder.build(&profiles);

        if outcome.manifest.users.is_empty() && !profiles.is_empty() {
            warn!(profiles = profiles.len(), "No valid users in identity export");
        }
        Ok(outcome)
    }

    async fn store_users(&self, manifest: UserManifest) -> Result<Arc<Snapshot>, GovernanceError> {
        let held = manifest.held.len();
        let snapshot = self.store.put(Manifest::Users(manifest)).await?;
        info!(
            version = snapshot.version,
            users = snapshot.manifest.len(),
            held,
            "Stored user manifest"
        );
        Ok(snapshot)
    }

    /// Store an administrator-authored asset manifest as the new current
    /// snapshot. Records are validated at reconciliation time.
    pub async fn publish_assets(&self, manifest: AssetManifest) -> Result<Arc<Snapshot>, GovernanceError> {
        let _guard = self.try_lock(ManifestKind::Assets)?;
        let snapshot = self.store.put(Manifest::Assets(manifest)).await?;
        info!(
            version = snapshot.version,
            grants = snapshot.manifest.len(),
            "Stored asset manifest"
        );
        Ok(snapshot)
    }

    /// Reconcile the current snapshot of `kind` against the platform and,
    /// unless `dry_run`, apply the plan
    pub async fn reconcile(
        &self,
        kind: ManifestKind,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<RunReport, GovernanceError> {
        let _guard = self.try_lock(kind)?;
        let mut report = RunReport::start(kind, dry_run);

        let pair = match self.store.snapshot_pair(kind).await {
            Ok(pair) => pair,
            Err(e) if e.is_not_found() => return Err(GovernanceError::ManifestMissing(kind)),
            Err(e) => return Err(e.into()),
        };
        report.manifest_version = Some(pair.current.version);
        self.log_start(&report, pair.previous.as_ref().map(|s| s.version));

        let state = self.state_source.current_state(None).await?;
        let previous = pair.previous.as_deref().map(|s| &s.manifest);
        let reconciliation = self.plan(&pair.current.manifest, previous, &state);

        self.apply(report, reconciliation, cancel).await
    }

    /// Ingest then reconcile users under a single lock.
    ///
    /// The built manifest is stored only after the platform state has been
    /// read, and never on a dry run.
    pub async fn sync_users(
        &self,
        source: &dyn IdentitySource,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<RunReport, GovernanceError> {
        let _guard = self.try_lock(ManifestKind::Users)?;
        let outcome = self.build(source).await?;

        let mut report = RunReport::start(ManifestKind::Users, dry_run);
        report.rejected = outcome.rejected;
        report.inactive = outcome.inactive;

        let baseline = match self.store.get_current(ManifestKind::Users).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        let state = self.state_source.current_state(None).await?;

        let previous = baseline.as_deref().and_then(|s| s.manifest.as_users());
        let reconciliation = self.reconciler.plan_users(&outcome.manifest, previous, &state);

        if !dry_run {
            let snapshot = self.store_users(outcome.manifest).await?;
            report.manifest_version = Some(snapshot.version);
        }
        self.log_start(&report, baseline.as_ref().map(|s| s.version));

        self.apply(report, reconciliation, cancel).await
    }

    fn log_start(&self, report: &RunReport, previous: Option<u64>) {
        let policy = self.reconciler.policy();
        info!(
            run_id = %report.run_id,
            kind = %report.kind,
            version = ?report.manifest_version,
            previous = ?previous,
            dry_run = report.dry_run,
            allow_user_deletion = policy.allow_user_deletion,
            allow_group_deletion = policy.allow_group_deletion,
            "Starting reconciliation"
        );
    }

    fn plan(&self, desired: &Manifest, previous: Option<&Manifest>, state: &PlatformState) -> Reconciliation {
        match desired {
            Manifest::Users(desired) => {
                self.reconciler
                    .plan_users(desired, previous.and_then(Manifest::as_users), state)
            }
            Manifest::Assets(desired) => {
                self.reconciler
                    .plan_assets(desired, previous.and_then(Manifest::as_assets), state)
            }
        }
    }

    async fn apply(
        &self,
        mut report: RunReport,
        reconciliation: Reconciliation,
        cancel: &CancellationToken,
    ) -> Result<RunReport, GovernanceError> {
        report.rejected.extend(reconciliation.rejected);
        report.flagged = reconciliation.flagged;

        for entity in &report.flagged {
            warn!(
                target_kind = %entity.target,
                namespace = %entity.namespace,
                name = %entity.name,
                reason = ?entity.reason,
                "Undesired entity left in place"
            );
        }

        if report.dry_run {
            report.operations = OperationOutcome::planned(&reconciliation.plan);
        } else if !reconciliation.plan.is_empty() {
            report.operations = self.executor.execute(&reconciliation.plan, cancel).await;
            self.executor.flush().await?;
        }

        Ok(report.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AdapterError, PlatformError};
    use crate::identity::RawUserProfile;
    use crate::manifest::{InMemoryManifestStore, ManifestStore};
    use crate::platform::{LocalPlatform, PlatformModel};
    use crate::reconcile::{FlagReason, Target};
    use async_trait::async_trait;

    struct StaticSource(Vec<RawUserProfile>);

    #[async_trait]
    impl IdentitySource for StaticSource {
        async fn fetch_users(&self) -> Result<Vec<RawUserProfile>, AdapterError> {
            Ok(self.0.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl IdentitySource for DownSource {
        async fn fetch_users(&self) -> Result<Vec<RawUserProfile>, AdapterError> {
            Err(AdapterError::Unauthorized { status: 401 })
        }
    }

    struct DownPlatform;

    #[async_trait]
    impl PlatformStateSource for DownPlatform {
        async fn current_state(&self, _namespace: Option<&str>) -> Result<PlatformState, PlatformError> {
            Err(PlatformError::Io {
                path: "platform.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "down"),
            })
        }
    }

    fn profile(username: &str, user_type: &str) -> RawUserProfile {
        profile_in(username, "default", "default_authors", user_type)
    }

    fn profile_in(username: &str, namespace: &str, department: &str, user_type: &str) -> RawUserProfile {
        RawUserProfile::from_pairs([
            ("username", username),
            ("organization", namespace),
            ("department", department),
            ("userType", user_type),
            ("email", username),
        ])
    }

    fn agent() -> (GovernanceAgent, Arc<InMemoryManifestStore>, Arc<LocalPlatform>) {
        let store = Arc::new(InMemoryManifestStore::new());
        let platform = Arc::new(LocalPlatform::in_memory(PlatformModel::default()));
        let agent = GovernanceAgent::new(store.clone(), platform.clone(), platform.clone());
        (agent, store, platform)
    }

    #[tokio::test]
    async fn test_sync_users_applies_and_is_idempotent() {
        let (agent, _, platform) = agent();
        let source = StaticSource(vec![profile("a@x.com", "AUTHOR"), profile("b@x.com", "")]);
        let cancel = CancellationToken::new();

        let report = agent.sync_users(&source, false, &cancel).await.unwrap();
        assert_eq!(report.manifest_version, Some(1));
        assert_eq!(report.counts.applied, 3);
        assert_eq!(report.counts.rejected, 1);
        assert_eq!(platform.model().await.users.len(), 1);

        let rerun = agent.sync_users(&source, false, &cancel).await.unwrap();
        assert_eq!(rerun.manifest_version, Some(2));
        assert!(rerun.operations.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let (agent, _, platform) = agent();
        let source = StaticSource(vec![profile("a@x.com", "AUTHOR")]);
        agent.ingest_users(&source).await.unwrap();

        let report = agent
            .reconcile(ManifestKind::Users, true, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.counts.planned, 3);
        assert_eq!(report.counts.applied, 0);
        assert_eq!(platform.model().await, PlatformModel::default());
    }

    #[tokio::test]
    async fn test_dry_run_sync_keeps_stored_baseline() {
        let (agent, store, platform) = agent();
        let cancel = CancellationToken::new();
        let both = StaticSource(vec![
            profile("a@x.com", "AUTHOR"),
            profile_in("f@x.com", "finance", "finance_readers", "READER"),
        ]);
        let without_finance = StaticSource(vec![profile("a@x.com", "AUTHOR")]);

        agent.sync_users(&both, false, &cancel).await.unwrap();

        let preview = agent.sync_users(&without_finance, true, &cancel).await.unwrap();
        assert_eq!(preview.manifest_version, None);
        assert_eq!(preview.flagged.len(), 2);
        assert_eq!(store.get_current(ManifestKind::Users).await.unwrap().version, 1);

        let report = agent.sync_users(&without_finance, false, &cancel).await.unwrap();
        assert_eq!(report.manifest_version, Some(2));
        let user = report
            .flagged
            .iter()
            .find(|f| f.target == Target::User)
            .unwrap();
        assert_eq!(user.name, "f@x.com");
        assert_eq!(user.reason, FlagReason::RemovedFromManifest);
        assert_eq!(platform.model().await.users.len(), 2);
    }

    #[tokio::test]
    async fn test_custom_attribute_mapping() {
        let (agent, _, platform) = agent();
        let agent = agent.with_mapping(AttributeMapping {
            namespace: "costCenter".to_string(),
            ..AttributeMapping::default()
        });
        let source = StaticSource(vec![RawUserProfile::from_pairs([
            ("username", "a@x.com"),
            ("costCenter", "cc-42"),
            ("department", "cc-42-authors"),
            ("userType", "AUTHOR"),
            ("email", "a@x.com"),
        ])]);

        let ingestion = agent.ingest_users(&source).await.unwrap();
        assert!(ingestion.rejected.is_empty());

        agent
            .reconcile(ManifestKind::Users, false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(platform.model().await.namespaces.contains("cc-42"));
    }

    #[tokio::test]
    async fn test_unreadable_platform_stores_nothing() {
        let store = Arc::new(InMemoryManifestStore::new());
        let platform = Arc::new(LocalPlatform::in_memory(PlatformModel::default()));
        let agent = GovernanceAgent::new(store.clone(), Arc::new(DownPlatform), platform);

        let err = agent
            .sync_users(
                &StaticSource(vec![profile("a@x.com", "AUTHOR")]),
                false,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GovernanceError::Platform(_)));
        assert!(store.get_current(ManifestKind::Users).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_overlapping_run_is_rejected() {
        let (agent, _, _) = agent();
        let _held = agent.try_lock(ManifestKind::Users).unwrap();

        let err = agent
            .reconcile(ManifestKind::Users, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::RunInProgress(ManifestKind::Users)));

        // the other kind is independent
        let err = agent
            .reconcile(ManifestKind::Assets, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::ManifestMissing(ManifestKind::Assets)));
    }

    #[tokio::test]
    async fn test_adapter_failure_leaves_store_untouched() {
        let (agent, store, _) = agent();

        let err = agent.ingest_users(&DownSource).await.unwrap_err();

        assert!(matches!(err, GovernanceError::Adapter(AdapterError::Unauthorized { .. })));
        assert!(store.get_current(ManifestKind::Users).await.is_err());
    }
}
