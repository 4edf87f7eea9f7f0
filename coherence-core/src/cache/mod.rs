// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Invalidation-tracked local cache.
//!
//! A process-local read-through cache keyed by record identity. It is kept
//! coherent with the authoritative store by invalidation signals only; it
//! never receives pushed values on write.
//!
//! Per key the cache is either `Absent` or `Fresh(version)`. There is no stale
//! state: every invalidation, expiry or capacity decision fully evicts.

mod local;

pub use local::{CacheConfig, CacheEntry, CacheRead, CacheState, LocalCache, ReadSource};

use serde::{Deserialize, Serialize};

use crate::types::{RecordId, VersionToken};

/// Signal that cached data must be discarded. Carries no replacement value.
///
/// Delivered at-least-once and possibly out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// One key changed. `version` is the version of the write when the
    /// backend knows it.
    Key {
        id: RecordId,
        version: Option<VersionToken>,
    },
    /// Every cached entry must be revalidated.
    Broadcast { version: Option<VersionToken> },
}

impl InvalidationEvent {
    pub fn key(id: RecordId, version: VersionToken) -> Self {
        Self::Key {
            id,
            version: Some(version),
        }
    }

    pub fn unversioned(id: RecordId) -> Self {
        Self::Key { id, version: None }
    }

    pub fn broadcast(version: Option<VersionToken>) -> Self {
        Self::Broadcast { version }
    }
}

/// Point-in-time counters for a local cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub installs: u64,
    /// Fetched values not installed because an invalidation overtook them.
    pub rejected_installs: u64,
    pub invalidations_received: u64,
    pub entries_invalidated: u64,
    pub capacity_evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups served locally.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
