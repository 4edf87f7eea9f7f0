// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Append log + materialized view adapter. Reads go straight to the view;
//! there is no local cache to keep coherent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use crate::adapter::{
    decode_record, encode_payload, engine_failure, not_connected, with_deadline, BackendAdapter,
};
use crate::config::LogViewSettings;
use crate::engines::{AppendLog, MaterializedView, NetworkProfile};
use crate::error::CoherenceResult;
use crate::types::{BackendKind, Record, RecordId, VersionToken, VersionedRecord, VisibilityToken};

struct Connection {
    log: Arc<AppendLog>,
    view: Arc<MaterializedView>,
    tailer: JoinHandle<()>,
}

pub struct LogViewAdapter {
    settings: LogViewSettings,
    conn: Option<Connection>,
}

impl LogViewAdapter {
    pub fn new(settings: LogViewSettings) -> Self {
        Self {
            settings,
            conn: None,
        }
    }

    fn conn(&self) -> CoherenceResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| not_connected(&self.settings.name))
    }
}

#[async_trait]
impl BackendAdapter for LogViewAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::LogView
    }

    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn initialize(&mut self) -> CoherenceResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let log = Arc::new(AppendLog::new(NetworkProfile::with_latency(
            self.settings.latency,
        )));
        let (view, tailer) = MaterializedView::start(Arc::clone(&log), self.settings.commit_interval);

        info!(
            backend = %self.settings.name,
            commit_interval_ms = self.settings.commit_interval.as_millis() as u64,
            "log view adapter initialized"
        );
        self.conn = Some(Connection { log, view, tailer });
        Ok(())
    }

    async fn publish(
        &self,
        records: &[Record],
        timeout: Duration,
    ) -> CoherenceResult<VisibilityToken> {
        let conn = self.conn()?;
        if records.is_empty() {
            return Ok(VisibilityToken::new(
                VersionToken::new(conn.log.len()),
                Vec::new(),
            ));
        }

        with_deadline("publish", timeout, async {
            let mut last = VersionToken::ZERO;
            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                let payload = encode_payload(&record.payload)?;
                last = conn
                    .log
                    .append(record.id.clone(), payload)
                    .await
                    .map_err(|e| engine_failure(&self.settings.name, "appending", e))?;
                ids.push(record.id.clone());
            }
            Ok(VisibilityToken::new(last, ids))
        })
        .await
    }

    async fn read(
        &self,
        id: &RecordId,
        timeout: Duration,
    ) -> CoherenceResult<Option<VersionedRecord>> {
        let conn = self.conn()?;
        with_deadline("read", timeout, async {
            conn.view
                .get(id)
                .map(|stored| decode_record(id, &stored.payload, stored.version))
                .transpose()
        })
        .await
    }

    async fn wait_for_visibility(
        &self,
        token: &VisibilityToken,
        timeout: Duration,
    ) -> CoherenceResult<Duration> {
        let conn = self.conn()?;
        if token.is_empty() {
            return Ok(Duration::ZERO);
        }

        with_deadline("wait_for_visibility", timeout, async {
            let start = Instant::now();
            conn.view.wait_for(token.version).await;
            Ok(start.elapsed())
        })
        .await
    }

    async fn delete(&self, id: &RecordId, timeout: Duration) -> CoherenceResult<bool> {
        let conn = self.conn()?;
        with_deadline("delete", timeout, async {
            // Catch up first so a record still in flight counts as existing.
            conn.view.wait_for(VersionToken::new(conn.log.len())).await;
            if conn.view.get(id).is_none() {
                return Ok(false);
            }
            let version = conn
                .log
                .tombstone(id.clone())
                .await
                .map_err(|e| engine_failure(&self.settings.name, "appending tombstone", e))?;
            conn.view.wait_for(version).await;
            Ok(true)
        })
        .await
    }

    async fn clear(&self, timeout: Duration) -> CoherenceResult<()> {
        let conn = self.conn()?;
        with_deadline("clear", timeout, async {
            let version = conn
                .log
                .append_clear()
                .await
                .map_err(|e| engine_failure(&self.settings.name, "appending clear", e))?;
            conn.view.wait_for(version).await;
            Ok(())
        })
        .await
    }

    async fn teardown(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        conn.tailer.abort();
        conn.log.shutdown();
        info!(
            backend = %self.settings.name,
            entries = conn.log.len(),
            "log view adapter torn down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoherenceError;
    use crate::types::Payload;

    const BOUND: Duration = Duration::from_secs(2);

    fn adapter(commit_interval: Duration) -> LogViewAdapter {
        LogViewAdapter::new(LogViewSettings {
            name: "log-view".to_string(),
            commit_interval,
            latency: Duration::ZERO,
        })
    }

    fn record(id: &str, name: &str) -> Record {
        Record::new(RecordId::new(id).unwrap(), Payload::new(name, false))
    }

    #[tokio::test]
    async fn test_bulk_publish_token_is_last_offset() {
        let mut adapter = adapter(Duration::from_millis(1));
        adapter.initialize().await.unwrap();

        let token = adapter
            .publish(&[record("a", "1"), record("b", "2"), record("c", "3")], BOUND)
            .await
            .unwrap();
        assert_eq!(token.version, VersionToken::new(3));
        assert_eq!(token.ids.len(), 3);

        adapter.wait_for_visibility(&token, BOUND).await.unwrap();
        let read = adapter
            .read(&RecordId::new("c").unwrap(), BOUND)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.version, token.version);
        adapter.teardown().await;
    }

    #[tokio::test]
    async fn test_slow_commit_times_out() {
        let mut adapter = adapter(Duration::from_millis(500));
        adapter.initialize().await.unwrap();

        let token = adapter.publish(&[record("a", "1")], BOUND).await.unwrap();
        let err = adapter
            .wait_for_visibility(&token, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        adapter.teardown().await;
    }

    #[tokio::test]
    async fn test_empty_publish_has_no_side_effects() {
        let mut adapter = adapter(Duration::ZERO);
        adapter.initialize().await.unwrap();

        let token = adapter.publish(&[], BOUND).await.unwrap();
        assert!(token.is_empty());
        assert_eq!(token.version, VersionToken::ZERO);
        assert_eq!(
            adapter.wait_for_visibility(&token, BOUND).await.unwrap(),
            Duration::ZERO
        );
        adapter.teardown().await;
    }

    #[tokio::test]
    async fn test_delete_waits_for_view() {
        let mut adapter = adapter(Duration::from_millis(5));
        adapter.initialize().await.unwrap();
        let id = RecordId::new("a").unwrap();

        // Not yet folded into the view, but still found by delete.
        adapter.publish(&[record("a", "1")], BOUND).await.unwrap();
        assert!(adapter.delete(&id, BOUND).await.unwrap());
        assert!(adapter.read(&id, BOUND).await.unwrap().is_none());
        assert!(!adapter.delete(&id, BOUND).await.unwrap());
        adapter.teardown().await;
    }

    #[tokio::test]
    async fn test_clear_empties_view() {
        let mut adapter = adapter(Duration::from_millis(1));
        adapter.initialize().await.unwrap();

        let token = adapter
            .publish(&[record("a", "1"), record("b", "2")], BOUND)
            .await
            .unwrap();
        adapter.wait_for_visibility(&token, BOUND).await.unwrap();

        adapter.clear(BOUND).await.unwrap();
        let conn = adapter.conn().unwrap();
        assert!(conn.view.is_empty());

        // Later writes land on the emptied view as usual.
        let again = adapter.publish(&[record("a", "3")], BOUND).await.unwrap();
        adapter.wait_for_visibility(&again, BOUND).await.unwrap();
        let read = adapter
            .read(&RecordId::new("a").unwrap(), BOUND)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.record.payload.name, "3");
        adapter.teardown().await;
    }

    #[tokio::test]
    async fn test_publish_before_initialize_fails() {
        let adapter = adapter(Duration::ZERO);
        let err = adapter.publish(&[record("a", "1")], BOUND).await.unwrap_err();
        assert!(matches!(err, CoherenceError::BackendUnavailable { .. }));
    }
}
