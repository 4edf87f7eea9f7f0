// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Scriptable in-memory adapter shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coherence_core::{
    BackendAdapter, BackendKind, CoherenceError, CoherenceResult, Record, RecordId, VersionToken,
    VersionedRecord, VisibilityToken,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Healthy,
    FailInit,
    /// `publish` sleeps far past any bound it is given.
    IgnoreTimeout,
    /// `publish` returns `OperationTimeout` immediately.
    ReportTimeout,
    /// Writes are acknowledged but never stored.
    LoseWrites,
    /// `publish` panics.
    Panic,
}

pub struct MockAdapter {
    name: String,
    latency: Duration,
    behavior: Behavior,
    records: Mutex<HashMap<RecordId, VersionedRecord>>,
    version: AtomicU64,
    teardowns: Arc<AtomicUsize>,
}

impl MockAdapter {
    pub fn new(name: &str, latency: Duration, behavior: Behavior) -> Self {
        Self::with_counter(name, latency, behavior, Arc::new(AtomicUsize::new(0)))
    }

    pub fn with_counter(
        name: &str,
        latency: Duration,
        behavior: Behavior,
        teardowns: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            name: name.to_string(),
            latency,
            behavior,
            records: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
            teardowns,
        }
    }

    pub fn boxed(self) -> Box<dyn BackendAdapter> {
        Box::new(self)
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::DistributedMap
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> CoherenceResult<()> {
        if self.behavior == Behavior::FailInit {
            return Err(CoherenceError::BackendUnavailable {
                backend: self.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        records: &[Record],
        timeout: Duration,
    ) -> CoherenceResult<VisibilityToken> {
        match self.behavior {
            Behavior::IgnoreTimeout => tokio::time::sleep(Duration::from_secs(30)).await,
            Behavior::ReportTimeout => return Err(CoherenceError::timeout("publish", timeout)),
            Behavior::Panic => panic!("{} lost its connection pool", self.name),
            _ => tokio::time::sleep(self.latency).await,
        }

        let version = VersionToken::new(self.version.fetch_add(1, Ordering::SeqCst) + 1);
        if self.behavior != Behavior::LoseWrites {
            let mut stored = self.records.lock().unwrap();
            for record in records {
                stored.insert(
                    record.id.clone(),
                    VersionedRecord {
                        record: record.clone(),
                        version,
                    },
                );
            }
        }
        Ok(VisibilityToken::new(
            version,
            records.iter().map(|r| r.id.clone()).collect(),
        ))
    }

    async fn read(
        &self,
        id: &RecordId,
        _timeout: Duration,
    ) -> CoherenceResult<Option<VersionedRecord>> {
        tokio::time::sleep(self.latency).await;
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn wait_for_visibility(
        &self,
        _token: &VisibilityToken,
        _timeout: Duration,
    ) -> CoherenceResult<Duration> {
        tokio::time::sleep(self.latency).await;
        Ok(self.latency)
    }

    async fn delete(&self, id: &RecordId, _timeout: Duration) -> CoherenceResult<bool> {
        Ok(self.records.lock().unwrap().remove(id).is_some())
    }

    async fn clear(&self, _timeout: Duration) -> CoherenceResult<()> {
        self.records.lock().unwrap().clear();
        Ok(())
    }

    async fn teardown(&mut self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}
