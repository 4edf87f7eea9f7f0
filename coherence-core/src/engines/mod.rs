// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-process engines standing in for the external collaborators.
//!
//! Each engine reproduces the observable behavior of one category of
//! storage/streaming system: how writes are accepted, how versions advance,
//! how readers learn about change. They report failures with their own
//! `EngineError`, which adapters translate at the adapter boundary.

pub mod append_log;
pub mod distributed_map;
pub mod snapshot_store;
pub mod tracked_kv;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

pub use append_log::{AppendLog, LogEntry, LogOp, MaterializedView};
pub use distributed_map::DistributedMap;
pub use snapshot_store::{Announcement, RefreshOutcome, SnapshotConsumer, SnapshotStore};
pub use tracked_kv::{ClientId, TrackedKvStore, TrackingMode};

use crate::types::VersionToken;

/// Errors raised inside an engine, before translation by an adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connection refused: {engine} is not running")]
    ConnectionRefused { engine: &'static str },

    #[error("storage I/O failed ({context}): {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt data at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A serialized payload as held by an engine, with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub payload: Vec<u8>,
    pub version: VersionToken,
}

/// Simulated network characteristics for remote calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkProfile {
    /// Round-trip cost added to every remote call.
    pub latency: Duration,
}

impl NetworkProfile {
    /// A profile with no added latency.
    pub const LOCAL: NetworkProfile = NetworkProfile {
        latency: Duration::ZERO,
    };

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }

    /// Pay the cost of one round trip.
    pub async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

/// Running/stopped flag shared by every engine.
#[derive(Debug)]
pub(crate) struct Liveness {
    engine: &'static str,
    running: AtomicBool,
}

impl Liveness {
    pub(crate) fn new(engine: &'static str) -> Self {
        Self {
            engine,
            running: AtomicBool::new(true),
        }
    }

    pub(crate) fn check(&self) -> EngineResult<()> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::ConnectionRefused {
                engine: self.engine,
            })
        }
    }

    pub(crate) fn stop(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
