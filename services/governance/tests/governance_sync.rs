//! End-to-end governance runs against the local platform model.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use qs_governance::agents::governance::{ApplyConfig, GovernanceAgent, OperationStatus};
use qs_governance::error::{ApplyError, ApplyErrorKind, GovernanceError};
use qs_governance::identity::JsonFileSource;
use qs_governance::manifest::{
    AssetCategory, AssetManifest, AssetRecord, FileManifestStore, ManifestKind, Permission,
};
use qs_governance::platform::{LocalPlatform, PlatformApplier, PlatformModel};
use qs_governance::reconcile::{FlagReason, Operation, Target};

fn write_profiles(dir: &Path, name: &str, users: &[(&str, &str, &str, &str)]) -> PathBuf {
    let entries: Vec<_> = users
        .iter()
        .map(|(username, org, department, user_type)| {
            json!({
                "attributes": {
                    "username": username,
                    "organization": org,
                    "department": department,
                    "userType": user_type,
                    "email": username
                }
            })
        })
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec(&entries).unwrap()).unwrap();
    path
}

fn table_a() -> AssetRecord {
    AssetRecord {
        name: "table_a".to_string(),
        category: AssetCategory::Dataset,
        namespace: "default".to_string(),
        group: "default_authors".to_string(),
        permission: Permission::Read,
    }
}

fn fast_retries() -> ApplyConfig {
    ApplyConfig {
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

/// Delegates to the local platform, rejecting one namespace and slowing
/// every call down
struct FaultyPlatform {
    inner: Arc<LocalPlatform>,
    reject_namespace: Option<String>,
    delay: Duration,
}

#[async_trait]
impl PlatformApplier for FaultyPlatform {
    async fn apply(&self, operation: &Operation) -> Result<(), ApplyError> {
        tokio::time::sleep(self.delay).await;
        if let Operation::CreateNamespace { namespace } = operation {
            if self.reject_namespace.as_deref() == Some(namespace.as_str()) {
                return Err(ApplyError::new(ApplyErrorKind::Rejected, "namespace quota exceeded"));
            }
        }
        self.inner.apply(operation).await
    }
}

#[tokio::test]
async fn test_users_and_assets_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileManifestStore::new(dir.path().join("manifests")));
    let platform = Arc::new(LocalPlatform::in_memory(
        PlatformModel::default().with_asset("ds-1", "table_a", AssetCategory::Dataset),
    ));
    let agent = GovernanceAgent::new(store, platform.clone(), platform.clone());
    let cancel = CancellationToken::new();

    let export = write_profiles(
        dir.path(),
        "users.json",
        &[
            ("a@x.com", "default", "default_authors", "AUTHOR"),
            ("nobody@x.com", "default", "default_readers", ""),
        ],
    );
    let report = agent
        .sync_users(&JsonFileSource::new(&export), false, &cancel)
        .await
        .unwrap();

    assert_eq!(report.counts.applied, 3);
    assert_eq!(report.counts.rejected, 1);
    assert_eq!(report.rejected[0].record, "nobody@x.com");
    assert!(report.is_clean());

    agent
        .publish_assets(AssetManifest::new(vec![table_a()]))
        .await
        .unwrap();
    let report = agent
        .reconcile(ManifestKind::Assets, false, &cancel)
        .await
        .unwrap();

    assert_eq!(report.operations.len(), 1);
    assert_eq!(report.operations[0].operation, Operation::CreateGrant { grant: table_a() });
    assert_eq!(report.operations[0].status, OperationStatus::Applied);

    let rerun = agent
        .reconcile(ManifestKind::Assets, false, &cancel)
        .await
        .unwrap();
    assert!(rerun.operations.is_empty());

    let rerun = agent
        .reconcile(ManifestKind::Users, false, &cancel)
        .await
        .unwrap();
    assert!(rerun.operations.is_empty());
}

#[tokio::test]
async fn test_removed_user_is_flagged_and_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileManifestStore::new(dir.path().join("manifests")));
    let platform = Arc::new(LocalPlatform::in_memory(PlatformModel::default()));
    let agent = GovernanceAgent::new(store, platform.clone(), platform.clone());
    let cancel = CancellationToken::new();

    let both = write_profiles(
        dir.path(),
        "v1.json",
        &[
            ("a@x.com", "default", "default_authors", "AUTHOR"),
            ("u@x.com", "default", "default_authors", "READER"),
        ],
    );
    agent
        .sync_users(&JsonFileSource::new(&both), false, &cancel)
        .await
        .unwrap();

    let one = write_profiles(
        dir.path(),
        "v2.json",
        &[("a@x.com", "default", "default_authors", "AUTHOR")],
    );
    let report = agent
        .sync_users(&JsonFileSource::new(&one), false, &cancel)
        .await
        .unwrap();

    assert!(report.operations.is_empty());
    assert_eq!(report.flagged.len(), 1);
    assert_eq!(report.flagged[0].target, Target::User);
    assert_eq!(report.flagged[0].name, "u@x.com");
    assert_eq!(report.flagged[0].reason, FlagReason::RemovedFromManifest);
    assert_eq!(platform.model().await.users.len(), 2);
}

#[tokio::test]
async fn test_failed_namespace_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileManifestStore::new(dir.path().join("manifests")));
    let platform = Arc::new(LocalPlatform::in_memory(PlatformModel::default()));
    let applier = Arc::new(FaultyPlatform {
        inner: platform.clone(),
        reject_namespace: Some("broken".to_string()),
        delay: Duration::ZERO,
    });
    let agent = GovernanceAgent::new(store, platform.clone(), applier).with_apply_config(fast_retries());

    let export = write_profiles(
        dir.path(),
        "users.json",
        &[
            ("a@x.com", "default", "default_authors", "AUTHOR"),
            ("b@x.com", "broken", "broken_readers", "READER"),
        ],
    );
    let report = agent
        .sync_users(&JsonFileSource::new(&export), false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.counts.applied, 3);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.skipped, 2);
    assert!(!report.is_clean());

    let failed = report
        .operations
        .iter()
        .find(|o| matches!(o.status, OperationStatus::Failed { .. }))
        .unwrap();
    assert_eq!(failed.operation.namespace(), "broken");
    assert!(report
        .operations
        .iter()
        .filter(|o| o.operation.namespace() == "broken" && o.index != failed.index)
        .all(|o| o.status == OperationStatus::SkippedDueToDependency { failed_index: failed.index }));

    let model = platform.model().await;
    assert!(model.namespaces.contains("default"));
    assert!(!model.namespaces.contains("broken"));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let platform_path = dir.path().join("platform.json");
    let export = write_profiles(
        dir.path(),
        "users.json",
        &[("a@x.com", "default", "default_authors", "AUTHOR")],
    );

    {
        let store = Arc::new(FileManifestStore::new(dir.path().join("manifests")));
        let platform = Arc::new(LocalPlatform::open(&platform_path).await.unwrap());
        let agent = GovernanceAgent::new(store, platform.clone(), platform);
        agent
            .sync_users(&JsonFileSource::new(&export), false, &CancellationToken::new())
            .await
            .unwrap();
    }

    let store = Arc::new(FileManifestStore::new(dir.path().join("manifests")));
    let platform = Arc::new(LocalPlatform::open(&platform_path).await.unwrap());
    let agent = GovernanceAgent::new(store, platform.clone(), platform);
    let report = agent
        .reconcile(ManifestKind::Users, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.manifest_version, Some(1));
    assert!(report.operations.is_empty());
}

#[tokio::test]
async fn test_overlapping_runs_of_same_kind() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileManifestStore::new(dir.path().join("manifests")));
    let platform = Arc::new(LocalPlatform::in_memory(PlatformModel::default()));
    let applier = Arc::new(FaultyPlatform {
        inner: platform.clone(),
        reject_namespace: None,
        delay: Duration::from_millis(100),
    });
    let agent = GovernanceAgent::new(store, platform.clone(), applier);
    let cancel = CancellationToken::new();

    let export = write_profiles(
        dir.path(),
        "users.json",
        &[("a@x.com", "default", "default_authors", "AUTHOR")],
    );
    agent.ingest_users(&JsonFileSource::new(&export)).await.unwrap();

    let first = agent.reconcile(ManifestKind::Users, false, &cancel);
    let second = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        agent.reconcile(ManifestKind::Users, false, &cancel).await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap().counts.applied, 3);
    assert!(matches!(
        second,
        Err(GovernanceError::RunInProgress(ManifestKind::Users))
    ));
}

#[tokio::test]
async fn test_reconcile_without_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileManifestStore::new(dir.path().join("manifests")));
    let platform = Arc::new(LocalPlatform::in_memory(PlatformModel::default()));
    let agent = GovernanceAgent::new(store, platform.clone(), platform);

    let err = agent
        .reconcile(ManifestKind::Assets, true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::ManifestMissing(ManifestKind::Assets)));
}
