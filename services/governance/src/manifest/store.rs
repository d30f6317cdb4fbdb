//! Manifest Store
//!
//! Durable, versioned storage of manifest snapshots. Every `put` produces a
//! new immutable snapshot and moves the previous current snapshot into the
//! "previous" slot, which reconciliation uses as its diff baseline.
//!
//! ## Consistency
//!
//! The (current, previous) pointer pair is always replaced as a whole:
//! an `Arc` swap in memory, a write-to-temp + rename on disk. Readers never
//! observe a half-updated pair.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{Manifest, ManifestKind, Snapshot};
use crate::error::StoreError;

/// Default number of snapshot versions kept on disk per kind
pub const DEFAULT_RETENTION: usize = 10;

const POINTER_FILE: &str = "pointer.json";

/// Current snapshot plus its baseline, read as one unit
#[derive(Debug, Clone)]
pub struct SnapshotPair {
    pub current: Arc<Snapshot>,
    pub previous: Option<Arc<Snapshot>>,
}

/// Storage of manifest snapshots per [`ManifestKind`]
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Store a new snapshot, retaining the former current one as previous
    async fn put(&self, manifest: Manifest) -> Result<Arc<Snapshot>, StoreError>;

    async fn get_current(&self, kind: ManifestKind) -> Result<Arc<Snapshot>, StoreError>;

    async fn get_previous(&self, kind: ManifestKind) -> Result<Arc<Snapshot>, StoreError>;

    /// Read current and previous together. A missing previous snapshot is
    /// `None`; a missing current snapshot is an error.
    async fn snapshot_pair(&self, kind: ManifestKind) -> Result<SnapshotPair, StoreError> {
        let current = self.get_current(kind).await?;
        let previous = match self.get_previous(kind).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        Ok(SnapshotPair { current, previous })
    }
}

fn not_found(kind: ManifestKind, generation: &'static str) -> StoreError {
    StoreError::NotFound { kind, generation }
}

fn next_snapshot(manifest: Manifest, current: Option<&Snapshot>) -> Snapshot {
    Snapshot {
        version: current.map(|s| s.version + 1).unwrap_or(1),
        created_at: Utc::now(),
        manifest,
    }
}

// ============================================================
// In-memory store
// ============================================================

/// Process-local store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryManifestStore {
    slots: RwLock<HashMap<ManifestKind, SnapshotPair>>,
}

impl InMemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManifestStore for InMemoryManifestStore {
    async fn put(&self, manifest: Manifest) -> Result<Arc<Snapshot>, StoreError> {
        let kind = manifest.kind();
        let mut slots = self.slots.write().await;

        let former = slots.get(&kind).map(|pair| pair.current.clone());
        let snapshot = Arc::new(next_snapshot(manifest, former.as_deref()));

        slots.insert(
            kind,
            SnapshotPair {
                current: snapshot.clone(),
                previous: former,
            },
        );

        debug!(kind = %kind, version = snapshot.version, "Stored manifest snapshot in memory");
        Ok(snapshot)
    }

    async fn get_current(&self, kind: ManifestKind) -> Result<Arc<Snapshot>, StoreError> {
        self.slots
            .read()
            .await
            .get(&kind)
            .map(|pair| pair.current.clone())
            .ok_or_else(|| not_found(kind, "current"))
    }

    async fn get_previous(&self, kind: ManifestKind) -> Result<Arc<Snapshot>, StoreError> {
        self.slots
            .read()
            .await
            .get(&kind)
            .and_then(|pair| pair.previous.clone())
            .ok_or_else(|| not_found(kind, "previous"))
    }

    async fn snapshot_pair(&self, kind: ManifestKind) -> Result<SnapshotPair, StoreError> {
        self.slots
            .read()
            .await
            .get(&kind)
            .cloned()
            .ok_or_else(|| not_found(kind, "current"))
    }
}

// ============================================================
// Directory-backed store
// ============================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Pointer {
    current: u64,
    previous: Option<u64>,
}

/// Directory-backed store.
///
/// Layout: `<root>/<kind>/v00000001.json` (immutable snapshots) and
/// `<root>/<kind>/pointer.json` (current/previous versions).
///
/// Readers hold `lock` shared across the pointer read and the snapshot
/// reads, so a concurrent `put` cannot prune a version they are about to open.
#[derive(Debug)]
pub struct FileManifestStore {
    root: PathBuf,
    retention: usize,
    lock: RwLock<()>,
}

impl FileManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retention: DEFAULT_RETENTION,
            lock: RwLock::new(()),
        }
    }

    /// Number of versions kept per kind (never fewer than two)
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(2);
        self
    }

    fn kind_dir(&self, kind: ManifestKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    fn snapshot_path(&self, kind: ManifestKind, version: u64) -> PathBuf {
        self.kind_dir(kind).join(format!("v{:08}.json", version))
    }

    async fn read_pointer(&self, kind: ManifestKind) -> Result<Option<Pointer>, StoreError> {
        let path = self.kind_dir(kind).join(POINTER_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn read_snapshot(&self, kind: ManifestKind, version: u64) -> Result<Arc<Snapshot>, StoreError> {
        let path = self.snapshot_path(kind, version);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| StoreError::Io { path, source })?;
        Ok(Arc::new(serde_json::from_slice(&bytes)?))
    }

    /// Delete versions that fell out of the retention window
    async fn prune(&self, kind: ManifestKind, current: u64) -> Result<(), StoreError> {
        let dir = self.kind_dir(kind);
        let oldest_kept = current.saturating_sub(self.retention as u64 - 1);

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;

        while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })? {
            let name = entry.file_name();
            let Some(version) = name
                .to_str()
                .and_then(|n| n.strip_prefix('v'))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };

            if version < oldest_kept {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!(kind = %kind, version, error = %e, "Failed to prune manifest snapshot");
                }
            }
        }

        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl ManifestStore for FileManifestStore {
    async fn put(&self, manifest: Manifest) -> Result<Arc<Snapshot>, StoreError> {
        let kind = manifest.kind();
        let _guard = self.lock.write().await;

        let dir = self.kind_dir(kind);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;

        let pointer = self.read_pointer(kind).await?;
        let snapshot = Snapshot {
            version: pointer.map(|p| p.current + 1).unwrap_or(1),
            created_at: Utc::now(),
            manifest,
        };

        let snapshot_path = self.snapshot_path(kind, snapshot.version);
        write_atomic(&snapshot_path, &serde_json::to_vec_pretty(&snapshot)?).await?;

        let next = Pointer {
            current: snapshot.version,
            previous: pointer.map(|p| p.current),
        };
        write_atomic(&dir.join(POINTER_FILE), &serde_json::to_vec(&next)?).await?;

        info!(
            kind = %kind,
            version = snapshot.version,
            records = snapshot.manifest.len(),
            path = ?snapshot_path,
            "Manifest snapshot stored"
        );

        self.prune(kind, snapshot.version).await?;
        Ok(Arc::new(snapshot))
    }

    async fn get_current(&self, kind: ManifestKind) -> Result<Arc<Snapshot>, StoreError> {
        let _guard = self.lock.read().await;
        let pointer = self
            .read_pointer(kind)
            .await?
            .ok_or_else(|| not_found(kind, "current"))?;
        self.read_snapshot(kind, pointer.current).await
    }

    async fn get_previous(&self, kind: ManifestKind) -> Result<Arc<Snapshot>, StoreError> {
        let _guard = self.lock.read().await;
        let previous = self
            .read_pointer(kind)
            .await?
            .and_then(|p| p.previous)
            .ok_or_else(|| not_found(kind, "previous"))?;
        self.read_snapshot(kind, previous).await
    }

    async fn snapshot_pair(&self, kind: ManifestKind) -> Result<SnapshotPair, StoreError> {
        let _guard = self.lock.read().await;
        let pointer = self
            .read_pointer(kind)
            .await?
            .ok_or_else(|| not_found(kind, "current"))?;

        let current = self.read_snapshot(kind, pointer.current).await?;
        let previous = match pointer.previous {
            Some(version) => Some(self.read_snapshot(kind, version).await?),
            None => None,
        };

        Ok(SnapshotPair { current, previous })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AssetManifest, UserManifest};

    fn users(n: usize) -> Manifest {
        let json = serde_json::json!({
            "Users": (0..n).map(|i| serde_json::json!({
                "username": format!("u{}@x.com", i),
                "namespace": "default",
                "groups": ["default_readers"],
                "role": "READER",
                "email": format!("u{}@x.com", i),
            })).collect::<Vec<_>>()
        });
        Manifest::Users(serde_json::from_value::<UserManifest>(json).unwrap())
    }

    #[tokio::test]
    async fn test_in_memory_first_run_has_no_previous() {
        let store = InMemoryManifestStore::new();

        assert!(store.get_current(ManifestKind::Users).await.unwrap_err().is_not_found());

        store.put(users(1)).await.unwrap();
        let err = store.get_previous(ManifestKind::Users).await.unwrap_err();
        assert!(err.is_not_found());

        let pair = store.snapshot_pair(ManifestKind::Users).await.unwrap();
        assert_eq!(pair.current.version, 1);
        assert!(pair.previous.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_put_rotates_previous() {
        let store = InMemoryManifestStore::new();
        store.put(users(1)).await.unwrap();
        store.put(users(2)).await.unwrap();

        let pair = store.snapshot_pair(ManifestKind::Users).await.unwrap();
        assert_eq!(pair.current.version, 2);
        assert_eq!(pair.current.manifest.len(), 2);
        assert_eq!(pair.previous.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let store = InMemoryManifestStore::new();
        store.put(users(1)).await.unwrap();
        store
            .put(Manifest::Assets(AssetManifest::default()))
            .await
            .unwrap();

        assert_eq!(store.get_current(ManifestKind::Users).await.unwrap().version, 1);
        assert_eq!(store.get_current(ManifestKind::Assets).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_pointer_swap() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path());

        assert!(store
            .get_current(ManifestKind::Users)
            .await
            .unwrap_err()
            .is_not_found());

        store.put(users(1)).await.unwrap();
        store.put(users(3)).await.unwrap();

        let pair = store.snapshot_pair(ManifestKind::Users).await.unwrap();
        assert_eq!(pair.current.version, 2);
        assert_eq!(pair.current.manifest.len(), 3);
        assert_eq!(pair.previous.as_ref().unwrap().manifest.len(), 1);

        // A fresh handle on the same directory sees the same pair
        let reopened = FileManifestStore::new(dir.path());
        assert_eq!(reopened.get_previous(ManifestKind::Users).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_file_store_prunes_old_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path()).with_retention(2);

        for n in 1..=4 {
            store.put(users(n)).await.unwrap();
        }

        let kind_dir = dir.path().join("users");
        assert!(!kind_dir.join("v00000001.json").exists());
        assert!(!kind_dir.join("v00000002.json").exists());
        assert!(kind_dir.join("v00000003.json").exists());
        assert!(kind_dir.join("v00000004.json").exists());
        assert_eq!(store.get_previous(ManifestKind::Users).await.unwrap().version, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pair_reads_race_with_pruning_puts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileManifestStore::new(dir.path()).with_retention(2));
        store.put(users(1)).await.unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for n in 2..=40 {
                    store.put(users(n)).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..40 {
            let pair = store.snapshot_pair(ManifestKind::Users).await.unwrap();
            if let Some(previous) = pair.previous {
                assert_eq!(previous.version + 1, pair.current.version);
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
