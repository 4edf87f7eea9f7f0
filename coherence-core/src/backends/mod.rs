// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Adapter implementations, one per backend kind.

mod log_view;
mod near_cache;
mod snapshot;
mod tracked_kv;

use std::future::Future;

pub use log_view::LogViewAdapter;
pub use near_cache::NearCacheAdapter;
pub use snapshot::SnapshotAdapter;
pub use tracked_kv::TrackedKvAdapter;

use crate::adapter::{decode_record, BackendAdapter};
use crate::cache::{CacheEntry, LocalCache};
use crate::config::BackendConfig;
use crate::engines::StoredValue;
use crate::error::CoherenceResult;
use crate::types::{RecordId, VersionToken, VersionedRecord};

/// Build the adapter for one configured backend. It still needs `initialize`.
pub fn build_adapter(config: &BackendConfig) -> Box<dyn BackendAdapter> {
    match config {
        BackendConfig::SnapshotStore(settings) => Box::new(SnapshotAdapter::new(settings.clone())),
        BackendConfig::LogView(settings) => Box::new(LogViewAdapter::new(settings.clone())),
        BackendConfig::DistributedMap(settings) => {
            Box::new(NearCacheAdapter::new(settings.clone()))
        }
        BackendConfig::TrackedKv(settings) => Box::new(TrackedKvAdapter::new(settings.clone())),
    }
}

/// Serve `id` from `cache`, falling back to `fetch` on a miss.
async fn read_through<F, Fut>(
    cache: &LocalCache,
    id: &RecordId,
    fetch: F,
) -> CoherenceResult<Option<VersionedRecord>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = CoherenceResult<Option<StoredValue>>>,
{
    let read = cache
        .get_or_fetch(id, move || async move {
            Ok(fetch()
                .await?
                .map(|stored| CacheEntry::new(stored.payload, stored.version)))
        })
        .await?;

    read.map(|r| decode_record(id, &r.entry.payload, r.entry.version))
        .transpose()
}

/// Whether a read observed `target` or something newer.
fn reached(read: &Option<VersionedRecord>, target: VersionToken) -> bool {
    read.as_ref().is_some_and(|r| r.version >= target)
}
