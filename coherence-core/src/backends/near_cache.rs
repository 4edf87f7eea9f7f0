// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Distributed map adapter with a near cache on the reading member.
//!
//! Writes land in the cluster map immediately. The near cache learns about
//! them only through keyed invalidations, so visibility is reached once a
//! read through the near cache returns the written revision.

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
use crate::config::DistributedMapSettings;
use crate::engines::{DistributedMap, NetworkProfile};
use crate::error::CoherenceResult;
use crate::types::{BackendKind, Record, RecordId, VersionToken, VersionedRecord, VisibilityToken};

struct Connection {
    map: Arc<DistributedMap>,
    listener: JoinHandle<()>,
}

pub struct NearCacheAdapter {
    settings: DistributedMapSettings,
    cache: Arc<LocalCache>,
    conn: Option<Connection>,
}

impl NearCacheAdapter {
    pub fn new(settings: DistributedMapSettings) -> Self {
        let cache = LocalCache::new_shared(
            format!("{}-near-cache", settings.name),
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

    async fn read_inner(
        &self,
        conn: &Connection,
        id: &RecordId,
    ) -> CoherenceResult<Option<VersionedRecord>> {
        read_through(&self.cache, id, move || async move {
            conn.map
                .get(id)
                .await
                .map_err(|e| engine_failure(&self.settings.name, "map get", e))
        })
        .await
    }
}

#[async_trait]
impl BackendAdapter for NearCacheAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::DistributedMap
    }

    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn initialize(&mut self) -> CoherenceResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let map = Arc::new(DistributedMap::new(
            NetworkProfile::with_latency(self.settings.latency),
            self.settings.invalidation_delay,
        ));
        let rx = map
            .subscribe()
            .map_err(|e| engine_failure(&self.settings.name, "registering near cache", e))?;
        let listener = self.cache.spawn_invalidation_listener(rx);

        info!(
            backend = %self.settings.name,
            max_entries = ?self.settings.cache.max_entries,
            "near cache adapter initialized"
        );
        self.conn = Some(Connection { map, listener });
        Ok(())
    }

    async fn publish(
        &self,
        records: &[Record],
        timeout: Duration,
    ) -> CoherenceResult<VisibilityToken> {
        let conn = self.conn()?;
        if records.is_empty() {
            return Ok(VisibilityToken::new(conn.map.current_version(), Vec::new()));
        }

        with_deadline("publish", timeout, async {
            let mut latest = VersionToken::ZERO;
            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                let payload = encode_payload(&record.payload)?;
                let version = conn
                    .map
                    .put(record.id.clone(), payload)
                    .await
                    .map_err(|e| engine_failure(&self.settings.name, "map put", e))?;
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
            let removed = conn
                .map
                .remove(id)
                .await
                .map_err(|e| engine_failure(&self.settings.name, "map remove", e))?;
            // The writing member's near cache is invalidated locally; others
            // learn through the cluster event.
            let event = match removed {
                Some(version) => InvalidationEvent::key(id.clone(), version),
                None => InvalidationEvent::unversioned(id.clone()),
            };
            self.cache.apply(event);
            Ok(removed.is_some())
        })
        .await
    }

    async fn clear(&self, timeout: Duration) -> CoherenceResult<()> {
        let conn = self.conn()?;
        with_deadline("clear", timeout, async {
            let version = conn
                .map
                .clear()
                .await
                .map_err(|e| engine_failure(&self.settings.name, "map clear", e))?;
            self.cache.apply(InvalidationEvent::broadcast(Some(version)));
            Ok(())
        })
        .await
    }

    async fn teardown(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        conn.listener.abort();
        conn.map.shutdown();
        self.cache.clear();
        info!(backend = %self.settings.name, "near cache adapter torn down");
    }

    fn cache_stats(&self) -> Option<CacheStatsSnapshot> {
        Some(self.cache.stats())
    }

    fn clear_local_cache(&self) {
        self.cache.clear();
    }
}
