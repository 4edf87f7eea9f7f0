// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Tracked key-value store adapter (client-side caching with server-assisted
//! invalidation).
//!
//! The adapter opens one tracking connection for its reader. Invalidations
//! from the store are unversioned, so any notified key is evicted outright.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use super::{reached, read_through};
use crate::adapter::{
    encode_payload, engine_failure, not_connected, poll_until_visible, with_deadline,
    BackendAdapter,
};
use crate::cache::{CacheStatsSnapshot, InvalidationEvent, LocalCache};
use crate::config::{TrackedKvSettings, TrackingStrategy};
use crate::engines::{ClientId, NetworkProfile, TrackedKvStore, TrackingMode};
use crate::error::CoherenceResult;
use crate::types::{BackendKind, Record, RecordId, VersionToken, VersionedRecord, VisibilityToken};

struct Connection {
    store: Arc<TrackedKvStore>,
    client: ClientId,
    listener: JoinHandle<()>,
}

pub struct TrackedKvAdapter {
    settings: TrackedKvSettings,
    cache: Arc<LocalCache>,
    conn: Option<Connection>,
}

impl TrackedKvAdapter {
    pub fn new(settings: TrackedKvSettings) -> Self {
        let cache = LocalCache::new_shared(
            format!("{}-client-cache", settings.name),
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

    fn tracking_mode(&self) -> TrackingMode {
        match self.settings.tracking {
            TrackingStrategy::Default => TrackingMode::Default,
            TrackingStrategy::Broadcast => TrackingMode::Broadcast {
                prefix: self.settings.key_prefix.clone(),
            },
        }
    }

    async fn read_inner(
        &self,
        conn: &Connection,
        id: &RecordId,
    ) -> CoherenceResult<Option<VersionedRecord>> {
        read_through(&self.cache, id, move || async move {
            conn.store
                .get(conn.client, id)
                .await
                .map_err(|e| engine_failure(&self.settings.name, "get", e))
        })
        .await
    }
}

#[async_trait]
impl BackendAdapter for TrackedKvAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::TrackedKv
    }

    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn initialize(&mut self) -> CoherenceResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let store = Arc::new(TrackedKvStore::new(
            self.settings.key_prefix.clone(),
            NetworkProfile::with_latency(self.settings.latency),
        ));
        let (client, rx) = store
            .connect(self.tracking_mode())
            .await
            .map_err(|e| engine_failure(&self.settings.name, "enabling tracking", e))?;
        let listener = self.cache.spawn_invalidation_listener(rx);

        info!(
            backend = %self.settings.name,
            %client,
            tracking = ?self.settings.tracking,
            prefix = %self.settings.key_prefix,
            "tracked kv adapter initialized"
        );
        self.conn = Some(Connection {
            store,
            client,
            listener,
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
            return Ok(VisibilityToken::new(
                conn.store.current_version(),
                Vec::new(),
            ));
        }

        with_deadline("publish", timeout, async {
            let mut latest = VersionToken::ZERO;
            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                let payload = encode_payload(&record.payload)?;
                let version = conn
                    .store
                    .set(&record.id, payload)
                    .await
                    .map_err(|e| engine_failure(&self.settings.name, "set", e))?;
                latest = latest.max(version);
                ids.push(record.id.clone());
            }
            Ok(VisibilityToken::new(latest, ids))
        })
        .await
    }

    async fn read(
        &self,
        id: &RecordId,
        timeout: Duration,
    ) -> CoherenceResult<Option<VersionedRecord>> {
        let conn = self.conn()?;
        with_deadline("read", timeout, self.read_inner(conn, id)).await
    }

    async fn wait_for_visibility(
        &self,
        token: &VisibilityToken,
        timeout: Duration,
    ) -> CoherenceResult<Duration> {
        let conn = self.conn()?;
        let Some(watched) = token.ids.last() else {
            return Ok(Duration::ZERO);
        };

        let target = token.version;
        with_deadline(
            "wait_for_visibility",
            timeout,
            poll_until_visible(move || async move {
                Ok(reached(&self.read_inner(conn, watched).await?, target))
            }),
        )
        .await
    }

    async fn delete(&self, id: &RecordId, timeout: Duration) -> CoherenceResult<bool> {
        let conn = self.conn()?;
        with_deadline("delete", timeout, async {
            let existed = conn
                .store
                .del(id)
                .await
                .map_err(|e| engine_failure(&self.settings.name, "del", e))?;
            self.cache.apply(InvalidationEvent::unversioned(id.clone()));
            Ok(existed)
        })
        .await
    }

    async fn clear(&self, timeout: Duration) -> CoherenceResult<()> {
        let conn = self.conn()?;
        with_deadline("clear", timeout, async {
            conn.store
                .flush_all()
                .await
                .map_err(|e| engine_failure(&self.settings.name, "flushall", e))?;
            self.cache.apply(InvalidationEvent::broadcast(None));
            Ok(())
        })
        .await
    }

    async fn teardown(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        conn.listener.abort();
        conn.store.disconnect(conn.client);
        conn.store.shutdown();
        self.cache.clear();
        info!(backend = %self.settings.name, "tracked kv adapter torn down");
    }

    fn cache_stats(&self) -> Option<CacheStatsSnapshot> {
        Some(self.cache.stats())
    }

    fn clear_local_cache(&self) {
        self.cache.clear();
    }
}
