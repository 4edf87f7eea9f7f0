// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Append-only log with a continuously updated materialized view.
//!
//! Producers append keyed records to an ordered log. A view task tails the
//! log and folds each entry into a local key→latest-value table, committing
//! in batches every `commit_interval`. Readers query the table directly; there
//! is no explicit refresh call, data simply appears once the view catches up.
//! Deletes are tombstones; a clear marker empties the table when folded.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{EngineResult, Liveness, NetworkProfile, StoredValue};
use crate::types::{RecordId, VersionToken};

/// What one log entry does to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    Put { key: RecordId, payload: Vec<u8> },
    Tombstone { key: RecordId },
    Clear,
}

/// One entry of the log. Offsets start at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub offset: u64,
    pub op: LogOp,
}

impl LogEntry {
    /// Version a reader observes once this entry is applied.
    pub fn version(&self) -> VersionToken {
        VersionToken::new(self.offset + 1)
    }
}

/// Ordered, append-only log.
#[derive(Debug)]
pub struct AppendLog {
    entries: RwLock<Vec<LogEntry>>,
    /// Number of entries appended so far.
    head: watch::Sender<u64>,
    network: NetworkProfile,
    liveness: Liveness,
}

impl AppendLog {
    pub fn new(network: NetworkProfile) -> Self {
        let (head, _) = watch::channel(0);
        Self {
            entries: RwLock::new(Vec::new()),
            head,
            network,
            liveness: Liveness::new("append_log"),
        }
    }

    /// Append one record; returns the version it will be visible at.
    pub async fn append(&self, key: RecordId, payload: Vec<u8>) -> EngineResult<VersionToken> {
        self.push(LogOp::Put { key, payload }).await
    }

    /// Append a tombstone for `key`.
    pub async fn tombstone(&self, key: RecordId) -> EngineResult<VersionToken> {
        self.push(LogOp::Tombstone { key }).await
    }

    /// Append a marker that empties the view.
    pub async fn append_clear(&self) -> EngineResult<VersionToken> {
        self.push(LogOp::Clear).await
    }

    async fn push(&self, op: LogOp) -> EngineResult<VersionToken> {
        self.liveness.check()?;
        self.network.round_trip().await;
        self.liveness.check()?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let offset = entries.len() as u64;
        let entry = LogEntry { offset, op };
        let version = entry.version();
        entries.push(entry);
        self.head.send_replace(offset + 1);
        trace!(offset, "log append");
        Ok(version)
    }

    /// Read every entry at or after `from`.
    pub fn read_from(&self, from: u64) -> Vec<LogEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(from as usize..)
            .map(|tail| tail.to_vec())
            .unwrap_or_default()
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> u64 {
        *self.head.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe_head(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }

    /// Stop accepting appends. Returns false if already stopped.
    pub fn shutdown(&self) -> bool {
        self.liveness.stop()
    }

    pub fn is_running(&self) -> bool {
        self.liveness.is_running()
    }
}

/// Local key→latest-value table fed from the log.
#[derive(Debug)]
pub struct MaterializedView {
    table: DashMap<RecordId, StoredValue>,
    /// Number of log entries folded into `table`.
    applied: watch::Sender<u64>,
}

impl MaterializedView {
    /// Start tailing `log`. The returned handle runs until aborted.
    pub fn start(log: Arc<AppendLog>, commit_interval: Duration) -> (Arc<Self>, JoinHandle<()>) {
        let (applied, _) = watch::channel(0);
        let view = Arc::new(Self {
            table: DashMap::new(),
            applied,
        });

        let task_view = Arc::clone(&view);
        let handle = tokio::spawn(async move {
            task_view.run(log, commit_interval).await;
        });

        (view, handle)
    }

    async fn run(&self, log: Arc<AppendLog>, commit_interval: Duration) {
        let mut head = log.subscribe_head();
        let mut position = 0u64;

        loop {
            let available = *head.borrow_and_update();
            if available <= position {
                if head.changed().await.is_err() {
                    break;
                }
                continue;
            }

            if !commit_interval.is_zero() {
                tokio::time::sleep(commit_interval).await;
            }

            let batch = log.read_from(position);
            let applied = batch.len();
            for entry in batch {
                position = entry.offset + 1;
                let version = entry.version();
                match entry.op {
                    LogOp::Put { key, payload } => {
                        self.table.insert(key, StoredValue { payload, version });
                    }
                    LogOp::Tombstone { key } => {
                        self.table.remove(&key);
                    }
                    LogOp::Clear => self.table.clear(),
                }
            }
            self.applied.send_replace(position);
            trace!(applied, position, "view committed batch");
        }

        debug!(position, "materialized view stopped");
    }

    pub fn get(&self, id: &RecordId) -> Option<StoredValue> {
        self.table.get(id).map(|entry| entry.value().clone())
    }

    /// Highest version folded into the table.
    pub fn applied(&self) -> VersionToken {
        VersionToken::new(*self.applied.borrow())
    }

    /// Wait until the view has applied `version`.
    pub async fn wait_for(&self, version: VersionToken) {
        let mut rx = self.applied.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|applied| *applied >= version.value()).await;
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
