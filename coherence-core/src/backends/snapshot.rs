// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Snapshot store adapter.
//!
//! Every publish is one producer cycle whose records become the whole
//! dataset. Readers go through a local cache in front of a consumer that only
//! moves forward on refresh; each refresh pushes a versioned broadcast to the
//! cache. Waiting for visibility drives refreshes until the announced version
//! is loaded. An optional watcher refreshes on a fixed interval as well.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::read_through;
use crate::adapter::{
    engine_failure, not_connected, poll_until_visible, with_deadline, BackendAdapter,
};
use crate::cache::{CacheStatsSnapshot, InvalidationEvent, LocalCache};
use crate::config::SnapshotSettings;
use crate::engines::{EngineError, NetworkProfile, SnapshotConsumer, SnapshotStore};
use crate::error::{CoherenceError, CoherenceResult};
use crate::types::{BackendKind, Record, RecordId, VersionedRecord, VisibilityToken};

struct Connection {
    store: Arc<SnapshotStore>,
    consumer: Arc<SnapshotConsumer>,
    listener: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
    /// Owned scratch directory, removed on teardown.
    scratch: Option<TempDir>,
}

pub struct SnapshotAdapter {
    settings: SnapshotSettings,
    cache: Arc<LocalCache>,
    conn: Option<Connection>,
}

impl SnapshotAdapter {
    pub fn new(settings: SnapshotSettings) -> Self {
        let cache = LocalCache::new_shared(
            format!("{}-cache", settings.name),
            settings.cache.to_cache_config(),
        );
        Self {
            settings,
            cache,
            conn: None,
        }
    }

    fn conn(&self) -> CoherenceResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| not_connected(&self.settings.name))
    }

    fn fail(&self, context: &str, err: EngineError) -> CoherenceError {
        engine_failure(&self.settings.name, context, err)
    }

    fn prepare_directory(&self) -> CoherenceResult<(PathBuf, Option<TempDir>)> {
        if let Some(dir) = &self.settings.directory {
            return Ok((dir.clone(), None));
        }
        let scratch = tempfile::Builder::new()
            .prefix("coherence-snapshot-")
            .tempdir()
            .map_err(|e| CoherenceError::BackendUnavailable {
                backend: self.settings.name.clone(),
                reason: format!("creating snapshot directory: {}", e),
            })?;
        Ok((scratch.path().to_path_buf(), Some(scratch)))
    }
}

impl SnapshotAdapter {
    /// Refresh the consumer and drop cache entries older than what it loaded.
    async fn sync(&self, conn: &Connection) -> CoherenceResult<()> {
        let outcome = conn
            .consumer
            .refresh()
            .await
            .map_err(|e| self.fail("refreshing consumer", e))?;
        self.cache.apply(InvalidationEvent::broadcast(Some(outcome.after)));
        Ok(())
    }

    /// Publish `records` as the whole dataset and load it on the reader side.
    async fn replace_dataset(&self, conn: &Connection, records: &[Record]) -> CoherenceResult<()> {
        conn.store
            .publish_cycle(records)
            .await
            .map_err(|e| self.fail("publishing snapshot", e))?;
        self.sync(conn).await
    }
}

fn spawn_watcher(consumer: Arc<SnapshotConsumer>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match consumer.refresh().await {
                Ok(outcome) if outcome.advanced() => {
                    debug!(version = %outcome.after, "watcher refreshed consumer");
                }
                Ok(_) => {}
                Err(EngineError::ConnectionRefused { .. }) => break,
                Err(e) => warn!(error = %e, "announcement watcher refresh failed"),
            }
        }
    })
}

#[async_trait]
impl BackendAdapter for SnapshotAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::SnapshotStore
    }

    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn initialize(&mut self) -> CoherenceResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let (dir, scratch) = self.prepare_directory()?;
        let network = NetworkProfile::with_latency(self.settings.latency);
        let store = SnapshotStore::open(&dir, network)
            .await
            .map_err(|e| self.fail("opening snapshot store", e))?;
        let store = Arc::new(store);

        let consumer = Arc::new(SnapshotConsumer::new(Arc::clone(&store)));
        let listener = self.cache.spawn_invalidation_listener(consumer.subscribe());
        consumer
            .refresh()
            .await
            .map_err(|e| self.fail("initial refresh", e))?;

        let watcher = self
            .settings
            .watch_interval
            .map(|interval| spawn_watcher(Arc::clone(&consumer), interval));

        info!(backend = %self.settings.name, dir = %dir.display(), "snapshot adapter initialized");
        self.conn = Some(Connection {
            store,
            consumer,
            listener,
            watcher,
            scratch,
        });
        Ok(())
    }

    async fn publish(
        &self,
        records: &[Record],
        timeout: Duration,
    ) -> CoherenceResult<VisibilityToken> {
        let conn = self.conn()?;
        if records.is_empty() {
            return Ok(VisibilityToken::new(conn.store.last_version(), Vec::new()));
        }

        with_deadline("publish", timeout, async {
            let version = conn
                .store
                .publish_cycle(records)
                .await
                .map_err(|e| self.fail("publishing snapshot", e))?;
            let ids = records.iter().map(|r| r.id.clone()).collect();
            Ok(VisibilityToken::new(version, ids))
        })
        .await
    }

    async fn read(
        &self,
        id: &RecordId,
        timeout: Duration,
    ) -> CoherenceResult<Option<VersionedRecord>> {
        let conn = self.conn()?;
        with_deadline("read", timeout, async {
            read_through(&self.cache, id, move || async move { Ok(conn.consumer.lookup(id)) }).await
        })
        .await
    }

    async fn wait_for_visibility(
        &self,
        token: &VisibilityToken,
        timeout: Duration,
    ) -> CoherenceResult<Duration> {
        let conn = self.conn()?;
        if token.is_empty() {
            return Ok(Duration::ZERO);
        }

        let consumer = &conn.consumer;
        let cache = &self.cache;
        let target = token.version;
        with_deadline(
            "wait_for_visibility",
            timeout,
            poll_until_visible(move || async move {
                let outcome = consumer
                    .refresh()
                    .await
                    .map_err(|e| self.fail("refreshing consumer", e))?;
                if outcome.after < target {
                    return Ok(false);
                }
                // The watcher may have done the refresh; evict here as well so a
                // read right after this call cannot hit the previous snapshot.
                cache.apply(InvalidationEvent::broadcast(Some(outcome.after)));
                Ok(true)
            }),
        )
        .await
    }

    async fn delete(&self, id: &RecordId, timeout: Duration) -> CoherenceResult<bool> {
        let conn = self.conn()?;
        with_deadline("delete", timeout, async {
            self.sync(conn).await?;
            let mut records = conn
                .consumer
                .records()
                .map_err(|e| self.fail("listing snapshot", e))?;
            let before = records.len();
            records.retain(|r| &r.id != id);
            if records.len() == before {
                return Ok(false);
            }
            self.replace_dataset(conn, &records).await?;
            Ok(true)
        })
        .await
    }

    async fn clear(&self, timeout: Duration) -> CoherenceResult<()> {
        let conn = self.conn()?;
        with_deadline("clear", timeout, self.replace_dataset(conn, &[])).await
    }

    async fn teardown(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if let Some(watcher) = conn.watcher {
            watcher.abort();
        }
        conn.listener.abort();
        conn.store.shutdown();
        self.cache.clear();

        if let Some(scratch) = conn.scratch {
            if let Err(e) = scratch.close() {
                warn!(backend = %self.settings.name, error = %e, "failed to remove snapshot directory");
            }
        }
        info!(backend = %self.settings.name, "snapshot adapter torn down");
    }

    fn cache_stats(&self) -> Option<CacheStatsSnapshot> {
        Some(self.cache.stats())
    }

    fn clear_local_cache(&self) {
        self.cache.clear();
    }
}
