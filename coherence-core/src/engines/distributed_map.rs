// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Distributed key-value map with near-cache invalidation.
//!
//! Writes are visible cluster-wide as soon as `put` returns. Every write is
//! followed by a keyed invalidation pushed to each registered near cache,
//! optionally after a delay to mimic batched invalidation delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{EngineResult, Liveness, NetworkProfile, StoredValue};
use crate::cache::InvalidationEvent;
use crate::types::{RecordId, VersionToken};

type Subscribers = Vec<mpsc::UnboundedSender<InvalidationEvent>>;

/// Cluster-wide map shared by every member.
#[derive(Debug)]
pub struct DistributedMap {
    entries: DashMap<RecordId, StoredValue>,
    sequence: AtomicU64,
    subscribers: Mutex<Subscribers>,
    network: NetworkProfile,
    invalidation_delay: Duration,
    liveness: Liveness,
}

impl DistributedMap {
    pub fn new(network: NetworkProfile, invalidation_delay: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            network,
            invalidation_delay,
            liveness: Liveness::new("distributed_map"),
        }
    }

    /// Register a near cache; it receives a keyed invalidation for every write.
    pub fn subscribe(&self) -> EngineResult<mpsc::UnboundedReceiver<InvalidationEvent>> {
        self.liveness.check()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Ok(rx)
    }

    /// Write one entry; returns the revision assigned to it.
    pub async fn put(&self, id: RecordId, payload: Vec<u8>) -> EngineResult<VersionToken> {
        self.liveness.check()?;
        self.network.round_trip().await;
        self.liveness.check()?;

        let version = VersionToken::new(self.sequence.fetch_add(1, Ordering::AcqRel) + 1);
        let value = StoredValue { payload, version };
        match self.entries.entry(id.clone()) {
            Entry::Occupied(mut existing) => {
                // A concurrent put with a later revision already landed.
                if existing.get().version < version {
                    existing.insert(value);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }

        self.invalidate(InvalidationEvent::key(id, version));
        Ok(version)
    }

    /// Read one entry from its owning member.
    pub async fn get(&self, id: &RecordId) -> EngineResult<Option<StoredValue>> {
        self.liveness.check()?;
        self.network.round_trip().await;
        Ok(self.entries.get(id).map(|entry| entry.value().clone()))
    }

    /// Remove one entry; returns the revision of the removal if it existed.
    pub async fn remove(&self, id: &RecordId) -> EngineResult<Option<VersionToken>> {
        self.liveness.check()?;
        self.network.round_trip().await;

        if self.entries.remove(id).is_none() {
            return Ok(None);
        }
        let version = VersionToken::new(self.sequence.fetch_add(1, Ordering::AcqRel) + 1);
        self.invalidate(InvalidationEvent::key(id.clone(), version));
        Ok(Some(version))
    }

    /// Remove every entry; returns the revision of the clear.
    pub async fn clear(&self) -> EngineResult<VersionToken> {
        self.liveness.check()?;
        self.network.round_trip().await;

        self.entries.clear();
        let version = VersionToken::new(self.sequence.fetch_add(1, Ordering::AcqRel) + 1);
        self.invalidate(InvalidationEvent::broadcast(Some(version)));
        Ok(version)
    }

    fn invalidate(&self, event: InvalidationEvent) {
        if self.invalidation_delay.is_zero() {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            deliver(&mut subscribers, &event);
            return;
        }

        let targets: Subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let delay = self.invalidation_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for tx in &targets {
                let _ = tx.send(event.clone());
            }
        });
    }

    /// Revision of the most recent write.
    pub fn current_version(&self) -> VersionToken {
        VersionToken::new(self.sequence.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Leave the cluster. Near caches are told to drop everything.
    pub fn shutdown(&self) -> bool {
        if !self.liveness.stop() {
            return false;
        }
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        deliver(&mut subscribers, &InvalidationEvent::broadcast(None));
        subscribers.clear();
        debug!("distributed map shut down");
        true
    }

    pub fn is_running(&self) -> bool {
        self.liveness.is_running()
    }
}

fn deliver(subscribers: &mut Subscribers, event: &InvalidationEvent) {
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    trace!(subscribers = subscribers.len(), ?event, "invalidation delivered");
}
