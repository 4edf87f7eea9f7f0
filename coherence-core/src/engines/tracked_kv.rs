// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Key-value store with server-assisted client-side caching.
//!
//! Clients register for tracking in one of two modes:
//! - `Default`: the server remembers which keys the client has read and sends
//!   one invalidation the next time each of them is modified.
//! - `Broadcast`: the server remembers nothing per key and notifies the client
//!   of every write to a key under the registered prefix.
//!
//! Invalidation messages carry only the key, never a version. `flush_all`
//! tells every client to drop its whole cache.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{EngineResult, Liveness, NetworkProfile, StoredValue};
use crate::cache::InvalidationEvent;
use crate::types::{RecordId, VersionToken};

/// Connection identity assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// How the store decides which clients to notify on a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingMode {
    /// Notify only about keys the client has read since its last notification.
    Default,
    /// Notify about every write to a key starting with `prefix`.
    Broadcast { prefix: String },
}

#[derive(Debug)]
struct Client {
    mode: TrackingMode,
    tx: mpsc::UnboundedSender<InvalidationEvent>,
}

#[derive(Debug)]
pub struct TrackedKvStore {
    key_prefix: String,
    values: DashMap<String, StoredValue>,
    /// Namespaced key → clients in default mode that have read it.
    tracking: DashMap<String, HashSet<ClientId>>,
    clients: DashMap<ClientId, Client>,
    sequence: AtomicU64,
    next_client: AtomicU64,
    network: NetworkProfile,
    liveness: Liveness,
}

impl TrackedKvStore {
    /// Create a store that namespaces every record under `key_prefix`.
    pub fn new(key_prefix: impl Into<String>, network: NetworkProfile) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            values: DashMap::new(),
            tracking: DashMap::new(),
            clients: DashMap::new(),
            sequence: AtomicU64::new(0),
            next_client: AtomicU64::new(1),
            network,
            liveness: Liveness::new("tracked_kv"),
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn namespaced(&self, id: &RecordId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// Open a connection with tracking enabled in `mode`.
    pub async fn connect(
        &self,
        mode: TrackingMode,
    ) -> EngineResult<(ClientId, mpsc::UnboundedReceiver<InvalidationEvent>)> {
        self.liveness.check()?;
        self.network.round_trip().await;

        let id = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(client = %id, ?mode, "tracking enabled");
        self.clients.insert(id, Client { mode, tx });
        Ok((id, rx))
    }

    /// Close a connection and forget everything tracked for it.
    pub fn disconnect(&self, client: ClientId) {
        if self.clients.remove(&client).is_some() {
            self.tracking.retain(|_, readers| {
                readers.remove(&client);
                !readers.is_empty()
            });
            debug!(client = %client, "client disconnected");
        }
    }

    /// Read one key on behalf of `client`, registering it for tracking.
    pub async fn get(&self, client: ClientId, id: &RecordId) -> EngineResult<Option<StoredValue>> {
        self.liveness.check()?;
        self.network.round_trip().await;

        let key = self.namespaced(id);
        let tracks_keys = self
            .clients
            .get(&client)
            .is_some_and(|c| c.mode == TrackingMode::Default);
        // Register before reading so a write racing with this read still notifies.
        if tracks_keys {
            self.tracking.entry(key.clone()).or_default().insert(client);
        }
        Ok(self.values.get(&key).map(|value| value.value().clone()))
    }

    /// Write one key; returns the revision assigned to it.
    pub async fn set(&self, id: &RecordId, payload: Vec<u8>) -> EngineResult<VersionToken> {
        self.liveness.check()?;
        self.network.round_trip().await;
        self.liveness.check()?;

        let key = self.namespaced(id);
        let version = VersionToken::new(self.sequence.fetch_add(1, Ordering::AcqRel) + 1);
        let value = StoredValue { payload, version };
        match self.values.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().version < version {
                    existing.insert(value);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }

        self.notify_write(&key, id);
        Ok(version)
    }

    /// Delete one key. Returns true if it existed.
    pub async fn del(&self, id: &RecordId) -> EngineResult<bool> {
        self.liveness.check()?;
        self.network.round_trip().await;

        let key = self.namespaced(id);
        let existed = self.values.remove(&key).is_some();
        if existed {
            self.notify_write(&key, id);
        }
        Ok(existed)
    }

    /// Drop every key and tell every client to clear its cache.
    pub async fn flush_all(&self) -> EngineResult<()> {
        self.liveness.check()?;
        self.network.round_trip().await;

        self.values.clear();
        self.tracking.clear();
        let event = InvalidationEvent::broadcast(None);
        self.clients.retain(|_, client| client.tx.send(event.clone()).is_ok());
        debug!(clients = self.clients.len(), "flushed all keys");
        Ok(())
    }

    fn notify_write(&self, key: &str, id: &RecordId) {
        let event = InvalidationEvent::unversioned(id.clone());
        let mut notified = 0usize;

        // Default-mode tracking is one-shot: the client must read again to re-arm.
        if let Some((_, readers)) = self.tracking.remove(key) {
            for reader in readers {
                if let Some(client) = self.clients.get(&reader) {
                    if client.tx.send(event.clone()).is_ok() {
                        notified += 1;
                    }
                }
            }
        }

        for client in self.clients.iter() {
            if let TrackingMode::Broadcast { prefix } = &client.mode {
                if key.starts_with(prefix.as_str()) && client.tx.send(event.clone()).is_ok() {
                    notified += 1;
                }
            }
        }

        trace!(key, notified, "write invalidation");
    }

    /// Revision of the most recent write.
    pub fn current_version(&self) -> VersionToken {
        VersionToken::new(self.sequence.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Stop the server and close every client connection.
    pub fn shutdown(&self) -> bool {
        if !self.liveness.stop() {
            return false;
        }
        self.clients.clear();
        self.tracking.clear();
        debug!("tracked kv store shut down");
        true
    }

    pub fn is_running(&self) -> bool {
        self.liveness.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn id(name: &str) -> RecordId {
        RecordId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = TrackedKvStore::new("user:", NetworkProfile::LOCAL);
        let (client, _rx) = store.connect(TrackingMode::Default).await.unwrap();

        let version = store.set(&id("u1"), b"alice".to_vec()).await.unwrap();
        let value = store.get(client, &id("u1")).await.unwrap().unwrap();
        assert_eq!(value.version, version);
        assert!(store.get(client, &id("u2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_mode_notifies_only_read_keys_once() {
        let store = TrackedKvStore::new("user:", NetworkProfile::LOCAL);
        let (client, mut rx) = store.connect(TrackingMode::Default).await.unwrap();

        store.set(&id("u1"), Vec::new()).await.unwrap();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        store.get(client, &id("u1")).await.unwrap();
        store.set(&id("u1"), Vec::new()).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), InvalidationEvent::unversioned(id("u1")));

        // Not re-armed until the client reads again.
        store.set(&id("u1"), Vec::new()).await.unwrap();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_broadcast_mode_notifies_prefix() {
        let store = TrackedKvStore::new("user:", NetworkProfile::LOCAL);
        let (_client, mut rx) = store
            .connect(TrackingMode::Broadcast {
                prefix: "user:".to_string(),
            })
            .await
            .unwrap();
        let (_other, mut other_rx) = store
            .connect(TrackingMode::Broadcast {
                prefix: "order:".to_string(),
            })
            .await
            .unwrap();

        store.set(&id("u7"), Vec::new()).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), InvalidationEvent::unversioned(id("u7")));
        assert_eq!(other_rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_flush_all_broadcasts() {
        let store = TrackedKvStore::new("user:", NetworkProfile::LOCAL);
        let (_client, mut rx) = store.connect(TrackingMode::Default).await.unwrap();
        store.set(&id("u1"), Vec::new()).await.unwrap();

        store.flush_all().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(rx.try_recv().unwrap(), InvalidationEvent::broadcast(None));
    }

    #[tokio::test]
    async fn test_disconnect_forgets_tracking() {
        let store = TrackedKvStore::new("user:", NetworkProfile::LOCAL);
        let (client, _rx) = store.connect(TrackingMode::Default).await.unwrap();
        store.get(client, &id("u1")).await.unwrap();

        store.disconnect(client);
        assert_eq!(store.client_count(), 0);
        assert!(store.tracking.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let store = TrackedKvStore::new("user:", NetworkProfile::LOCAL);
        let (_client, mut rx) = store.connect(TrackingMode::Default).await.unwrap();

        assert!(store.shutdown());
        assert!(rx.recv().await.is_none());
        assert!(store.set(&id("u1"), Vec::new()).await.is_err());
        assert!(store.connect(TrackingMode::Default).await.is_err());
    }
}
