//! Coherence Core Library
//!
//! Building blocks for measuring cache coherence across heterogeneous
//! storage backends: the backend adapter contract, an invalidation-tracked
//! local cache, in-process engines for each backend category, typed
//! configuration and the error taxonomy.

pub mod adapter;
pub mod backends;
pub mod cache;
pub mod config;
pub mod engines;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use adapter::{with_deadline, BackendAdapter};
pub use backends::{
    build_adapter, LogViewAdapter, NearCacheAdapter, SnapshotAdapter, TrackedKvAdapter,
};
pub use cache::{CacheConfig, CacheStatsSnapshot, InvalidationEvent, LocalCache};
pub use config::{
    BackendConfig, BenchmarkConfig, CacheSettings, ConfigLoader, HarnessConfig,
    MIN_MEASUREMENT_ITERATIONS,
};
pub use error::{
    CoherenceError, CoherenceResult, HardValidationError, InvariantViolation, ObservedVersion,
};
pub use types::{
    BackendKind, Payload, Record, RecordId, VersionToken, VersionedRecord, VisibilityToken,
};
