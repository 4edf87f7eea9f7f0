// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The uniform contract every backend exposes to the measurement engine.
//!
//! Adapters own their engines and local caches exclusively. Every blocking
//! operation takes a caller-supplied bound and is cancelled at the adapter
//! boundary when it expires. Callers only ever see three failure kinds:
//! `BackendUnavailable`, `OperationTimeout` and `Serialization`.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cache::CacheStatsSnapshot;
use crate::engines::EngineError;
use crate::error::{CoherenceError, CoherenceResult};
use crate::types::{
    BackendKind, Payload, Record, RecordId, VersionToken, VersionedRecord, VisibilityToken,
};

/// Delay between polls while waiting for a write to become visible.
pub const VISIBILITY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Uniform operations over one backend.
///
/// Lifecycle: constructed → `initialize` → any number of `publish` / `read` /
/// `wait_for_visibility` / `delete` / `clear` → `teardown`. Operations after teardown fail with
/// `BackendUnavailable`.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Backend category driven by this adapter.
    fn kind(&self) -> BackendKind;

    /// Configured name, unique within a run.
    fn name(&self) -> &str;

    /// Connect to the backend and start any background tasks.
    ///
    /// Calling it again on an initialized adapter is a no-op.
    async fn initialize(&mut self) -> CoherenceResult<()>;

    /// Make `records` durable in the backend.
    async fn publish(
        &self,
        records: &[Record],
        timeout: Duration,
    ) -> CoherenceResult<VisibilityToken>;

    /// Read the value the adapter's reader currently sees. `None` if absent.
    async fn read(
        &self,
        id: &RecordId,
        timeout: Duration,
    ) -> CoherenceResult<Option<VersionedRecord>>;

    /// Block until a reader observes `token`, returning how long it took.
    async fn wait_for_visibility(
        &self,
        token: &VisibilityToken,
        timeout: Duration,
    ) -> CoherenceResult<Duration>;

    /// Remove one record; returns whether it existed. Reads through this
    /// adapter stop returning it before the call completes.
    async fn delete(&self, id: &RecordId, timeout: Duration) -> CoherenceResult<bool>;

    /// Remove every record. Reads through this adapter see an empty dataset
    /// before the call completes.
    async fn clear(&self, timeout: Duration) -> CoherenceResult<()>;

    /// Release every resource. Never fails.
    async fn teardown(&mut self);

    /// Counters of the local cache, for backends that read through one.
    fn cache_stats(&self) -> Option<CacheStatsSnapshot> {
        None
    }

    /// Drop every locally cached entry.
    fn clear_local_cache(&self) {}
}

/// Run `fut` under `timeout`, cancelling it when the bound expires.
pub async fn with_deadline<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> CoherenceResult<T>
where
    F: Future<Output = CoherenceResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoherenceError::timeout(operation, timeout)),
    }
}

/// Poll until `visible` reports true, then return the elapsed time.
///
/// The caller bounds this with `with_deadline`.
pub(crate) async fn poll_until_visible<F, Fut>(mut visible: F) -> CoherenceResult<Duration>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoherenceResult<bool>>,
{
    let start = Instant::now();
    loop {
        if visible().await? {
            return Ok(start.elapsed());
        }
        tokio::time::sleep(VISIBILITY_POLL_INTERVAL).await;
    }
}

/// Translate an engine failure into the adapter-facing taxonomy.
pub(crate) fn engine_failure(backend: &str, context: &str, err: EngineError) -> CoherenceError {
    match err {
        EngineError::ConnectionRefused { .. } | EngineError::Io { .. } => {
            CoherenceError::BackendUnavailable {
                backend: backend.to_string(),
                reason: format!("{}: {}", context, err),
            }
        }
        EngineError::Corrupt { .. } | EngineError::Encoding(_) => {
            CoherenceError::serialization(context.to_string(), err)
        }
    }
}

/// Error for calls made before `initialize` or after `teardown`.
pub(crate) fn not_connected(backend: &str) -> CoherenceError {
    CoherenceError::BackendUnavailable {
        backend: backend.to_string(),
        reason: "adapter is not initialized".to_string(),
    }
}

pub(crate) fn encode_payload(payload: &Payload) -> CoherenceResult<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| CoherenceError::serialization("encoding payload", e))
}

pub(crate) fn decode_record(
    id: &RecordId,
    bytes: &[u8],
    version: VersionToken,
) -> CoherenceResult<VersionedRecord> {
    let payload: Payload = serde_json::from_slice(bytes)
        .map_err(|e| CoherenceError::serialization(format!("decoding payload of {}", id), e))?;
    Ok(VersionedRecord {
        record: Record::new(id.clone(), payload),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_expires() {
        let result: CoherenceResult<()> = with_deadline("read", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(CoherenceError::OperationTimeout {
                operation,
                timeout_ms,
            }) => {
                assert_eq!(operation, "read");
                assert_eq!(timeout_ms, 10);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deadline_passes_inner_result() {
        let result = with_deadline("read", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_poll_until_visible() {
        let mut polls = 0;
        let elapsed = poll_until_visible(|| {
            polls += 1;
            let done = polls >= 3;
            async move { Ok(done) }
        })
        .await
        .unwrap();
        assert_eq!(polls, 3);
        assert!(elapsed >= VISIBILITY_POLL_INTERVAL);
    }

    #[test]
    fn test_engine_failure_translation() {
        let refused = engine_failure(
            "near-cache",
            "put",
            EngineError::ConnectionRefused { engine: "distributed_map" },
        );
        assert!(matches!(refused, CoherenceError::BackendUnavailable { .. }));

        let corrupt = engine_failure(
            "snapshot",
            "refresh",
            EngineError::Corrupt {
                location: "blob".into(),
                reason: "checksum".into(),
            },
        );
        assert!(matches!(corrupt, CoherenceError::Serialization { .. }));
    }

    #[test]
    fn test_payload_codec() {
        let id = RecordId::new("u1").unwrap();
        let bytes = encode_payload(&Payload::new("alice", true)).unwrap();
        let record = decode_record(&id, &bytes, VersionToken::new(3)).unwrap();
        assert_eq!(record.record.payload.name, "alice");
        assert_eq!(record.version, VersionToken::new(3));

        let err = decode_record(&id, b"not json", VersionToken::new(1)).unwrap_err();
        assert!(matches!(err, CoherenceError::Serialization { .. }));
    }
}
