// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Snapshot/announcement store.
//!
//! A producer writes whole-dataset snapshot blobs into a directory and then
//! announces the new version by rewriting a pointer file. Consumers hold the
//! last loaded snapshot in memory and only see new data after an explicit
//! refresh, which reads the pointer, fetches the blob and swaps state.
//!
//! Layout:
//! ```text
//! <dir>/snapshot-00000000000000000007.json   blob (JSON records)
//! <dir>/announced.version                    "7 1a2b3c4d\n" (version, crc32 of blob)
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{EngineError, EngineResult, Liveness, NetworkProfile, StoredValue};
use crate::cache::InvalidationEvent;
use crate::types::{Record, RecordId, VersionToken};

const ANNOUNCEMENT_FILE: &str = "announced.version";

/// On-disk snapshot blob.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBlob {
    version: u64,
    records: Vec<Record>,
}

/// Contents of the announcement pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    pub version: VersionToken,
    pub checksum: u32,
}

impl Announcement {
    fn encode(&self) -> String {
        format!("{} {:08x}\n", self.version.value(), self.checksum)
    }

    fn decode(raw: &str, location: &Path) -> EngineResult<Self> {
        let corrupt = |reason: &str| EngineError::Corrupt {
            location: location.display().to_string(),
            reason: reason.to_string(),
        };

        let mut parts = raw.split_whitespace();
        let version = parts
            .next()
            .ok_or_else(|| corrupt("empty announcement"))?
            .parse::<u64>()
            .map_err(|_| corrupt("version is not an integer"))?;
        let checksum = parts
            .next()
            .ok_or_else(|| corrupt("missing checksum"))
            .and_then(|c| u32::from_str_radix(c, 16).map_err(|_| corrupt("bad checksum")))?;

        Ok(Self {
            version: VersionToken::new(version),
            checksum,
        })
    }
}

/// Producer side of the snapshot store.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    network: NetworkProfile,
    liveness: Liveness,
    last_version: Arc<AtomicU64>,
    /// Serializes publish cycles. Held by the cycle task, not the caller.
    cycle: Arc<Mutex<()>>,
}

impl SnapshotStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// Resumes version numbering from an existing announcement.
    pub async fn open(dir: impl AsRef<Path>, network: NetworkProfile) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| EngineError::Io {
                context: "creating snapshot directory",
                source,
            })?;

        let store = Self {
            dir,
            network,
            liveness: Liveness::new("snapshot_store"),
            last_version: Arc::new(AtomicU64::new(0)),
            cycle: Arc::new(Mutex::new(())),
        };

        if let Some(announcement) = store.read_announcement().await? {
            store
                .last_version
                .store(announcement.version.value(), Ordering::Release);
        }

        info!(dir = %store.dir.display(), "snapshot store opened");
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, version: VersionToken) -> PathBuf {
        blob_path(&self.dir, version)
    }

    /// Run one publish cycle: the given records become the whole dataset.
    ///
    /// The cycle runs on its own task and completes even if the caller stops
    /// waiting, so the announced version and the version counter never diverge.
    pub async fn publish_cycle(&self, records: &[Record]) -> EngineResult<VersionToken> {
        self.liveness.check()?;
        let guard = Arc::clone(&self.cycle).lock_owned().await;

        let cycle = PublishCycle {
            dir: self.dir.clone(),
            network: self.network,
            last_version: Arc::clone(&self.last_version),
            records: records.to_vec(),
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            cycle.run().await
        });

        task.await.map_err(|e| EngineError::Io {
            context: "running publish cycle",
            source: std::io::Error::other(e),
        })?
    }

    /// Read the current announcement, if any version has been announced.
    pub async fn read_announcement(&self) -> EngineResult<Option<Announcement>> {
        self.liveness.check()?;
        read_announcement(&self.dir).await
    }

    /// Fetch and verify the blob named by an announcement.
    async fn fetch_blob(&self, announcement: Announcement) -> EngineResult<Vec<Record>> {
        self.liveness.check()?;
        let path = self.blob_path(announcement.version);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| EngineError::Io {
                context: "reading snapshot blob",
                source,
            })?;

        let actual = crc32fast::hash(&bytes);
        if actual != announcement.checksum {
            return Err(EngineError::Corrupt {
                location: path.display().to_string(),
                reason: format!(
                    "checksum mismatch: expected {:#010x}, got {:#010x}",
                    announcement.checksum, actual
                ),
            });
        }

        let blob: SnapshotBlob = serde_json::from_slice(&bytes)?;
        Ok(blob.records)
    }

    /// Latest version this producer has announced.
    pub fn last_version(&self) -> VersionToken {
        VersionToken::new(self.last_version.load(Ordering::Acquire))
    }

    /// Stop accepting calls. Returns false if already stopped.
    pub fn shutdown(&self) -> bool {
        self.liveness.stop()
    }

    pub fn is_running(&self) -> bool {
        self.liveness.is_running()
    }
}

/// Everything one publish cycle needs, owned so it can outlive the caller.
struct PublishCycle {
    dir: PathBuf,
    network: NetworkProfile,
    last_version: Arc<AtomicU64>,
    records: Vec<Record>,
}

impl PublishCycle {
    async fn run(self) -> EngineResult<VersionToken> {
        // The announcement on disk wins over the counter if they disagree.
        let announced = read_announcement(&self.dir)
            .await?
            .map_or(0, |a| a.version.value());
        let current = self.last_version.load(Ordering::Acquire).max(announced);
        let version = VersionToken::new(current + 1);

        let blob = serde_json::to_vec(&SnapshotBlob {
            version: version.value(),
            records: self.records,
        })?;
        let checksum = crc32fast::hash(&blob);

        self.network.round_trip().await;
        write_atomically(&blob_path(&self.dir, version), &blob, "writing snapshot blob").await?;

        let announcement = Announcement { version, checksum };
        write_atomically(
            &self.dir.join(ANNOUNCEMENT_FILE),
            announcement.encode().as_bytes(),
            "writing announcement",
        )
        .await?;

        self.last_version.store(version.value(), Ordering::Release);
        debug!(%version, bytes = blob.len(), "snapshot cycle published");
        Ok(version)
    }
}

fn blob_path(dir: &Path, version: VersionToken) -> PathBuf {
    dir.join(format!("snapshot-{:020}.json", version.value()))
}

async fn read_announcement(dir: &Path) -> EngineResult<Option<Announcement>> {
    let path = dir.join(ANNOUNCEMENT_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => Announcement::decode(&raw, &path).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(EngineError::Io {
            context: "reading announcement",
            source,
        }),
    }
}

async fn write_atomically(path: &Path, bytes: &[u8], context: &'static str) -> EngineResult<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|source| EngineError::Io { context, source })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| EngineError::Io { context, source })
}

/// One loaded snapshot.
#[derive(Debug, Default)]
struct SnapshotState {
    version: VersionToken,
    records: HashMap<RecordId, Vec<u8>>,
}

/// Versions before and after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub before: VersionToken,
    pub after: VersionToken,
}

impl RefreshOutcome {
    pub fn advanced(&self) -> bool {
        self.after > self.before
    }
}

/// Consumer side: an in-memory copy of the last snapshot it refreshed to.
#[derive(Debug)]
pub struct SnapshotConsumer {
    store: Arc<SnapshotStore>,
    state: RwLock<Arc<SnapshotState>>,
    refresh_lock: Mutex<()>,
    listeners: std::sync::Mutex<Vec<mpsc::UnboundedSender<InvalidationEvent>>>,
}

impl SnapshotConsumer {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            store,
            state: RwLock::new(Arc::new(SnapshotState::default())),
            refresh_lock: Mutex::new(()),
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Receive a broadcast invalidation every time a refresh swaps in a new snapshot.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<InvalidationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn current(&self) -> Arc<SnapshotState> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn current_version(&self) -> VersionToken {
        self.current().version
    }

    /// Look up a record in the loaded snapshot.
    pub fn lookup(&self, id: &RecordId) -> Option<StoredValue> {
        let state = self.current();
        state.records.get(id).map(|payload| StoredValue {
            payload: payload.clone(),
            version: state.version,
        })
    }

    /// Every record of the loaded snapshot, decoded.
    pub fn records(&self) -> EngineResult<Vec<Record>> {
        let state = self.current();
        state
            .records
            .iter()
            .map(|(id, payload)| Ok(Record::new(id.clone(), serde_json::from_slice(payload)?)))
            .collect()
    }

    /// Check the announcement and load the announced snapshot if it is newer.
    pub async fn refresh(&self) -> EngineResult<RefreshOutcome> {
        let _refresh = self.refresh_lock.lock().await;
        let before = self.current_version();

        self.store.network.round_trip().await;
        let Some(announcement) = self.store.read_announcement().await? else {
            return Ok(RefreshOutcome {
                before,
                after: before,
            });
        };

        if announcement.version <= before {
            return Ok(RefreshOutcome {
                before,
                after: before,
            });
        }

        let records = self.store.fetch_blob(announcement).await?;
        let mut loaded = HashMap::with_capacity(records.len());
        for record in records {
            loaded.insert(record.id, serde_json::to_vec(&record.payload)?);
        }

        let state = Arc::new(SnapshotState {
            version: announcement.version,
            records: loaded,
        });
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;

        self.notify(announcement.version);
        debug!(%before, after = %announcement.version, "consumer refresh successful");
        Ok(RefreshOutcome {
            before,
            after: announcement.version,
        })
    }

    fn notify(&self, version: VersionToken) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|tx| tx.send(InvalidationEvent::broadcast(Some(version))).is_ok());
        if listeners.len() < before {
            warn!(dropped = before - listeners.len(), "refresh listeners closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(id: &str, name: &str) -> Record {
        Record::new(RecordId::new(id).unwrap(), Payload::new(name, true))
    }

    #[tokio::test]
    async fn test_publish_requires_refresh() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap());
        let consumer = SnapshotConsumer::new(Arc::clone(&store));

        let version = store.publish_cycle(&[record("u1", "alice")]).await.unwrap();
        assert_eq!(version, VersionToken::new(1));

        let id = RecordId::new("u1").unwrap();
        assert!(consumer.lookup(&id).is_none());

        let outcome = consumer.refresh().await.unwrap();
        assert!(outcome.advanced());
        assert_eq!(consumer.lookup(&id).unwrap().version, version);
    }

    #[tokio::test]
    async fn test_consumer_lists_loaded_records() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap());
        let consumer = SnapshotConsumer::new(Arc::clone(&store));
        assert!(consumer.records().unwrap().is_empty());

        store
            .publish_cycle(&[record("u1", "alice"), record("u2", "bob")])
            .await
            .unwrap();
        consumer.refresh().await.unwrap();

        let mut names: Vec<String> = consumer
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.payload.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_replaces_dataset() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap());
        let consumer = SnapshotConsumer::new(Arc::clone(&store));

        store.publish_cycle(&[record("u1", "alice")]).await.unwrap();
        store.publish_cycle(&[record("u2", "bob")]).await.unwrap();
        consumer.refresh().await.unwrap();

        assert!(consumer.lookup(&RecordId::new("u1").unwrap()).is_none());
        assert!(consumer.lookup(&RecordId::new("u2").unwrap()).is_some());
        assert_eq!(consumer.current_version(), VersionToken::new(2));
    }

    #[tokio::test]
    async fn test_refresh_without_announcement_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap());
        let consumer = SnapshotConsumer::new(store);

        let outcome = consumer.refresh().await.unwrap();
        assert!(!outcome.advanced());
        assert_eq!(outcome.after, VersionToken::ZERO);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap());
        let consumer = SnapshotConsumer::new(Arc::clone(&store));

        let version = store.publish_cycle(&[record("u1", "alice")]).await.unwrap();
        std::fs::write(store.blob_path(version), b"{\"version\":1,\"records\":[]}").unwrap();

        let err = consumer.refresh().await.unwrap_err();
        assert!(matches!(err, EngineError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_reopen_resumes_versions() {
        let dir = TempDir::new().unwrap();
        {
            let store = SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap();
            store.publish_cycle(&[record("u1", "alice")]).await.unwrap();
            store.publish_cycle(&[record("u1", "alice")]).await.unwrap();
        }
        let store = SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap();
        assert_eq!(store.last_version(), VersionToken::new(2));
        let next = store.publish_cycle(&[record("u1", "alice")]).await.unwrap();
        assert_eq!(next, VersionToken::new(3));
    }

    #[tokio::test]
    async fn test_abandoned_publish_never_reuses_version() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap());
        let consumer = SnapshotConsumer::new(Arc::clone(&store));

        for micros in 0..40u64 {
            let records = [record("u1", "abandoned")];
            let cycle = store.publish_cycle(&records);
            let _ = tokio::time::timeout(Duration::from_micros(micros), cycle).await;
            consumer.refresh().await.unwrap();
        }

        let version = store.publish_cycle(&[record("fresh", "alice")]).await.unwrap();
        let announced = store.read_announcement().await.unwrap().unwrap();
        assert_eq!(announced.version, version);
        assert_eq!(store.last_version(), version);

        let outcome = consumer.refresh().await.unwrap();
        assert!(outcome.advanced(), "{:?}", outcome);
        assert_eq!(outcome.after, version);
        let id = RecordId::new("fresh").unwrap();
        assert_eq!(consumer.lookup(&id).unwrap().version, version);
    }

    #[tokio::test]
    async fn test_refresh_notifies_subscribers() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap());
        let consumer = SnapshotConsumer::new(Arc::clone(&store));
        let mut rx = consumer.subscribe();

        store.publish_cycle(&[record("u1", "alice")]).await.unwrap();
        consumer.refresh().await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            InvalidationEvent::broadcast(Some(VersionToken::new(1)))
        );
    }

    #[tokio::test]
    async fn test_shutdown_refuses_calls() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), NetworkProfile::LOCAL).await.unwrap();
        assert!(store.shutdown());
        let err = store.publish_cycle(&[]).await.unwrap_err();
        assert!(matches!(err, EngineError::ConnectionRefused { .. }));
    }
}
