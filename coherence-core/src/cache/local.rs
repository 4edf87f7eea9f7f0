// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Read-through local cache with invalidation tracking and bounded LRU.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{CacheStatsSnapshot, InvalidationEvent};
use crate::error::CoherenceResult;
use crate::types::{RecordId, VersionToken};

/// Configuration for a local cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries; `None` means unbounded.
    pub max_entries: Option<usize>,
    /// Entries older than this are expired on access.
    pub ttl: Option<Duration>,
    /// Entries not read for this long are expired on access.
    pub max_idle: Option<Duration>,
}

impl CacheConfig {
    /// Create an unbounded cache config with no expiry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the cache to `max` entries with LRU eviction.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max.max(1));
        self
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the idle expiry.
    pub fn with_max_idle(mut self, idle: Duration) -> Self {
        self.max_idle = Some(idle);
        self
    }
}

/// A serialized payload paired with the version it was fetched at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub version: VersionToken,
}

impl CacheEntry {
    pub fn new(payload: Vec<u8>, version: VersionToken) -> Self {
        Self { payload, version }
    }
}

/// Observable per-key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Fresh(VersionToken),
}

/// Where a successful read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Served from process memory, no backend round trip.
    Hit,
    /// Fetched from the backend on a miss.
    Fetched,
}

/// Result of `LocalCache::get_or_fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead {
    pub entry: CacheEntry,
    pub source: ReadSource,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    inserted_at: Instant,
    last_access: Instant,
    tick: u64,
}

/// Restriction placed on in-flight fetches by invalidations that overtook them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Barrier {
    /// An unversioned invalidation arrived; nothing fetched concurrently may be installed.
    Unconditional,
    /// Only versions strictly newer than this may be installed.
    Above(VersionToken),
}

impl Barrier {
    fn raise(current: Option<Barrier>, version: Option<VersionToken>) -> Barrier {
        match (current, version) {
            (Some(Barrier::Unconditional), _) | (_, None) => Barrier::Unconditional,
            (Some(Barrier::Above(floor)), Some(v)) => Barrier::Above(floor.max(v)),
            (None, Some(v)) => Barrier::Above(v),
        }
    }

    fn admits(&self, version: VersionToken) -> bool {
        match self {
            Barrier::Unconditional => false,
            Barrier::Above(floor) => version > *floor,
        }
    }
}

#[derive(Debug, Default)]
struct Inflight {
    fetches: usize,
    barrier: Option<Barrier>,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<RecordId, Slot>,
    /// LRU order: smallest tick is least recently used.
    recency: BTreeMap<u64, RecordId>,
    inflight: HashMap<RecordId, Inflight>,
    next_tick: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, id: &RecordId) -> Option<Slot> {
        let slot = self.slots.remove(id)?;
        self.recency.remove(&slot.tick);
        Some(slot)
    }

    fn touch(&mut self, id: &RecordId, now: Instant) {
        let tick = self.tick();
        if let Some(slot) = self.slots.get_mut(id) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            slot.last_access = now;
            self.recency.insert(tick, id.clone());
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    installs: AtomicU64,
    rejected_installs: AtomicU64,
    invalidations_received: AtomicU64,
    entries_invalidated: AtomicU64,
    capacity_evictions: AtomicU64,
    expirations: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Process-local cache kept coherent by invalidation signals.
///
/// Safe for concurrent readers and concurrent invalidation delivery; the
/// internal lock is never held across an `.await`.
#[derive(Debug)]
pub struct LocalCache {
    name: String,
    config: CacheConfig,
    inner: Mutex<Inner>,
    counters: Counters,
}

impl LocalCache {
    /// Create a new empty cache.
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::default()),
            counters: Counters::default(),
        }
    }

    /// Create a cache wrapped in an Arc for sharing across readers and the
    /// invalidation listener.
    pub fn new_shared(name: impl Into<String>, config: CacheConfig) -> Arc<Self> {
        Arc::new(Self::new(name, config))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, slot: &Slot, now: Instant) -> bool {
        let ttl_expired = self
            .config
            .ttl
            .is_some_and(|ttl| now.duration_since(slot.inserted_at) >= ttl);
        let idle_expired = self
            .config
            .max_idle
            .is_some_and(|idle| now.duration_since(slot.last_access) >= idle);
        ttl_expired || idle_expired
    }

    /// Look up a fresh entry without fetching. Counts as a hit or miss.
    pub fn get_cached(&self, id: &RecordId) -> Option<CacheEntry> {
        let entry = self.lookup(id);
        match entry {
            Some(_) => bump(&self.counters.hits),
            None => bump(&self.counters.misses),
        }
        entry
    }

    fn lookup(&self, id: &RecordId) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired = match inner.slots.get(id) {
            None => return None,
            Some(slot) => self.is_expired(slot, now),
        };

        if expired {
            inner.remove(id);
            bump(&self.counters.expirations);
            trace!(cache = %self.name, key = %id, "entry expired");
            return None;
        }

        inner.touch(id, now);
        inner.slots.get(id).map(|slot| slot.entry.clone())
    }

    /// Serve `id` locally, or run `fetch` on a miss and populate from its result.
    ///
    /// Concurrent misses for the same key may each fetch. A fetch that was
    /// overtaken by an invalidation still returns its value to the caller but
    /// is only installed if its version is newer than the invalidated one.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        id: &RecordId,
        fetch: F,
    ) -> CoherenceResult<Option<CacheRead>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoherenceResult<Option<CacheEntry>>>,
    {
        if let Some(entry) = self.lookup(id) {
            bump(&self.counters.hits);
            return Ok(Some(CacheRead {
                entry,
                source: ReadSource::Hit,
            }));
        }
        bump(&self.counters.misses);

        let guard = self.begin_fetch(id);
        bump(&self.counters.fetches);

        match fetch().await? {
            Some(entry) => {
                guard.complete(Some(&entry));
                Ok(Some(CacheRead {
                    entry,
                    source: ReadSource::Fetched,
                }))
            }
            None => {
                guard.complete(None);
                Ok(None)
            }
        }
    }

    fn begin_fetch(&self, id: &RecordId) -> FetchGuard<'_> {
        let mut inner = self.lock();
        inner.inflight.entry(id.clone()).or_default().fetches += 1;
        FetchGuard {
            cache: Some(self),
            id: id.clone(),
        }
    }

    /// Finish an in-flight fetch, installing `entry` when allowed.
    fn finish_fetch(&self, id: &RecordId, entry: Option<&CacheEntry>) {
        let mut inner = self.lock();

        let barrier = match inner.inflight.get_mut(id) {
            Some(inflight) => {
                inflight.fetches = inflight.fetches.saturating_sub(1);
                let barrier = inflight.barrier;
                if inflight.fetches == 0 {
                    inner.inflight.remove(id);
                }
                barrier
            }
            None => None,
        };

        let Some(entry) = entry else {
            return;
        };

        if barrier.is_some_and(|b| !b.admits(entry.version)) {
            bump(&self.counters.rejected_installs);
            debug!(
                cache = %self.name,
                key = %id,
                version = %entry.version,
                "fetch overtaken by invalidation, not installed"
            );
            return;
        }

        if let Some(existing) = inner.slots.get(id) {
            if existing.entry.version > entry.version {
                bump(&self.counters.rejected_installs);
                return;
            }
            inner.remove(id);
        }

        let now = Instant::now();
        let tick = inner.tick();
        inner.slots.insert(
            id.clone(),
            Slot {
                entry: entry.clone(),
                inserted_at: now,
                last_access: now,
                tick,
            },
        );
        inner.recency.insert(tick, id.clone());
        bump(&self.counters.installs);

        if let Some(max) = self.config.max_entries {
            while inner.slots.len() > max {
                let Some((_, victim)) = inner.recency.pop_first() else {
                    break;
                };
                inner.slots.remove(&victim);
                bump(&self.counters.capacity_evictions);
                trace!(cache = %self.name, key = %victim, "evicted for capacity");
            }
        }
    }

    /// Apply one invalidation signal.
    ///
    /// A keyed event evicts the entry unless the entry already holds a version
    /// at or beyond the event's version; unversioned events always evict.
    /// Broadcasts apply the same rule to every entry.
    pub fn apply(&self, event: InvalidationEvent) {
        bump(&self.counters.invalidations_received);
        let mut inner = self.lock();

        match event {
            InvalidationEvent::Key { id, version } => {
                let superseded = inner
                    .slots
                    .get(&id)
                    .is_some_and(|slot| is_superseded(slot.entry.version, version));
                if superseded {
                    inner.remove(&id);
                    bump(&self.counters.entries_invalidated);
                }
                if let Some(inflight) = inner.inflight.get_mut(&id) {
                    inflight.barrier = Some(Barrier::raise(inflight.barrier, version));
                }
                trace!(cache = %self.name, key = %id, evicted = superseded, "key invalidation");
            }
            InvalidationEvent::Broadcast { version } => {
                let victims: Vec<RecordId> = inner
                    .slots
                    .iter()
                    .filter(|(_, slot)| is_superseded(slot.entry.version, version))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &victims {
                    inner.remove(id);
                }
                self.counters
                    .entries_invalidated
                    .fetch_add(victims.len() as u64, Ordering::Relaxed);
                for inflight in inner.inflight.values_mut() {
                    inflight.barrier = Some(Barrier::raise(inflight.barrier, version));
                }
                debug!(cache = %self.name, evicted = victims.len(), "broadcast invalidation");
            }
        }
    }

    /// Consume invalidations from `rx` on a background task until the sender closes.
    pub fn spawn_invalidation_listener(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<InvalidationEvent>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                cache.apply(event);
            }
            debug!(cache = %cache.name, "invalidation channel closed");
        })
    }

    /// Get the current state of a key without touching recency or counters.
    pub fn state(&self, id: &RecordId) -> CacheState {
        let inner = self.lock();
        match inner.slots.get(id) {
            Some(slot) if !self.is_expired(slot, Instant::now()) => {
                CacheState::Fresh(slot.entry.version)
            }
            _ => CacheState::Absent,
        }
    }

    /// Check if a key currently holds a fresh entry.
    pub fn contains(&self, id: &RecordId) -> bool {
        matches!(self.state(id), CacheState::Fresh(_))
    }

    /// Number of entries held, including any not yet noticed as expired.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. In-flight fetches may still install afterwards.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.slots.clear();
        inner.recency.clear();
        debug!(cache = %self.name, "local cache cleared");
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let c = &self.counters;
        CacheStatsSnapshot {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            installs: c.installs.load(Ordering::Relaxed),
            rejected_installs: c.rejected_installs.load(Ordering::Relaxed),
            invalidations_received: c.invalidations_received.load(Ordering::Relaxed),
            entries_invalidated: c.entries_invalidated.load(Ordering::Relaxed),
            capacity_evictions: c.capacity_evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

/// An entry at `cached` is superseded by a write at `invalidated`.
fn is_superseded(cached: VersionToken, invalidated: Option<VersionToken>) -> bool {
    match invalidated {
        None => true,
        Some(v) => cached < v,
    }
}

/// Tracks one in-flight fetch; releases it if the fetch is cancelled or fails.
struct FetchGuard<'a> {
    cache: Option<&'a LocalCache>,
    id: RecordId,
}

impl FetchGuard<'_> {
    fn complete(mut self, entry: Option<&CacheEntry>) {
        if let Some(cache) = self.cache.take() {
            cache.finish_fetch(&self.id, entry);
        }
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.take() {
            cache.finish_fetch(&self.id, None);
        }
    }
}
