// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchmark orchestrator.
//!
//! Initializes every selected adapter, runs each operation kind through the
//! measurement engine, tears every adapter down and assembles the report.
//! An invariant violation stops the run once teardown has finished. A backend
//! that fails any other way, panics included, is reported as skipped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use coherence_core::{
    build_adapter, BackendAdapter, BenchmarkConfig, CoherenceError, CoherenceResult,
};
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::harness::{BenchmarkHarness, IdSequence};
use crate::metrics::{BackendReport, BenchmarkReport, OperationKind, SkippedBackend};

/// Prefix for every record identity written during a run.
const ID_PREFIX: &str = "user";

type Outcome = (Box<dyn BackendAdapter>, CoherenceResult<Option<BackendReport>>);

pub struct BenchmarkOrchestrator {
    config: BenchmarkConfig,
    operations: Vec<OperationKind>,
}

impl BenchmarkOrchestrator {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self {
            config,
            operations: OperationKind::ALL.to_vec(),
        }
    }

    /// Restrict the run to `operations`, in the given order.
    pub fn with_operations(mut self, operations: &[OperationKind]) -> Self {
        self.operations = operations.to_vec();
        self
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Build adapters from the configuration and run them.
    pub async fn run(&self) -> CoherenceResult<BenchmarkReport> {
        let adapters = self.config.backends.iter().map(build_adapter).collect();
        self.run_adapters(adapters).await
    }

    /// Run already-constructed adapters.
    pub async fn run_adapters(
        &self,
        adapters: Vec<Box<dyn BackendAdapter>>,
    ) -> CoherenceResult<BenchmarkReport> {
        let mut report = BenchmarkReport::new(&self.config.harness);
        let harness = BenchmarkHarness::from_config(&self.config.harness);
        info!(
            run_id = %report.run_id,
            backends = adapters.len(),
            iterations = harness.measured_iterations(),
            parallel = self.config.harness.parallel_backends,
            "starting benchmark run"
        );

        let mut ready = Vec::with_capacity(adapters.len());
        for mut adapter in adapters {
            match adapter.initialize().await {
                Ok(()) => ready.push(adapter),
                Err(e) => {
                    warn!(backend = adapter.name(), error = %e, "skipping backend");
                    report.skipped.push(SkippedBackend {
                        name: adapter.name().to_string(),
                        kind: adapter.kind(),
                        reason: e.to_string(),
                    });
                    adapter.teardown().await;
                }
            }
        }

        let outcomes = if self.config.harness.parallel_backends {
            self.run_parallel(&harness, ready).await
        } else {
            self.run_sequential(&harness, ready).await
        };

        let mut fatal = None;
        for (mut adapter, outcome) in outcomes {
            adapter.teardown().await;
            match outcome {
                Ok(Some(backend)) => report.add_backend(backend),
                Ok(None) => warn!(backend = adapter.name(), "backend cancelled before completion"),
                Err(e) if e.is_fatal() => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    warn!(backend = adapter.name(), error = %e, "backend did not complete");
                    report.skipped.push(SkippedBackend {
                        name: adapter.name().to_string(),
                        kind: adapter.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(e) = fatal {
            error!(run_id = %report.run_id, error = %e, "benchmark run aborted");
            return Err(e);
        }

        info!(
            run_id = %report.run_id,
            completed = report.backends.len(),
            skipped = report.skipped.len(),
            "benchmark run complete"
        );
        Ok(report)
    }

    async fn run_sequential(
        &self,
        harness: &BenchmarkHarness,
        adapters: Vec<Box<dyn BackendAdapter>>,
    ) -> Vec<Outcome> {
        let stop = AtomicBool::new(false);
        let mut outcomes = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let outcome =
                guarded_run_backend(harness, adapter.as_ref(), &self.operations, &stop).await;
            outcomes.push((adapter, outcome));
        }
        outcomes
    }

    async fn run_parallel(
        &self,
        harness: &BenchmarkHarness,
        adapters: Vec<Box<dyn BackendAdapter>>,
    ) -> Vec<Outcome> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        for (index, adapter) in adapters.into_iter().enumerate() {
            let harness = harness.clone();
            let operations = self.operations.clone();
            let stop = Arc::clone(&stop);
            tasks.spawn(async move {
                let outcome =
                    guarded_run_backend(&harness, adapter.as_ref(), &operations, &stop).await;
                (index, (adapter, outcome))
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => outcomes.push(entry),
                Err(e) => error!(error = %e, "backend task failed; its adapter was dropped"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// `run_backend` with a panic turned into an unavailable backend, so the
/// adapter stays with the caller for teardown.
async fn guarded_run_backend(
    harness: &BenchmarkHarness,
    adapter: &dyn BackendAdapter,
    operations: &[OperationKind],
    stop: &AtomicBool,
) -> CoherenceResult<Option<BackendReport>> {
    match AssertUnwindSafe(run_backend(harness, adapter, operations, stop))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(backend = adapter.name(), panic = %message, "backend panicked");
            Err(CoherenceError::BackendUnavailable {
                backend: adapter.name().to_string(),
                reason: format!("panicked: {}", message),
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

/// Measure every operation kind on one adapter.
///
/// Returns `Ok(None)` when another backend aborted the run first.
async fn run_backend(
    harness: &BenchmarkHarness,
    adapter: &dyn BackendAdapter,
    operations: &[OperationKind],
    stop: &AtomicBool,
) -> CoherenceResult<Option<BackendReport>> {
    let ids = IdSequence::new(ID_PREFIX)?;
    let mut results = Vec::with_capacity(operations.len());

    for &kind in operations {
        if stop.load(Ordering::Acquire) {
            return Ok(None);
        }
        info!(backend = adapter.name(), operation = %kind, "measuring");
        match harness.run(adapter, &ids, kind).await {
            Ok(result) => results.push(result),
            Err(e) => {
                stop.store(true, Ordering::Release);
                return Err(e);
            }
        }
    }

    Ok(Some(BackendReport {
        name: adapter.name().to_string(),
        kind: adapter.kind(),
        operations: results,
        cache_stats: adapter.cache_stats(),
    }))
}
