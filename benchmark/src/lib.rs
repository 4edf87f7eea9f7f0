// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Coherence Benchmarking Framework
//!
//! Measures how quickly writes become visible to readers across backends
//! that keep a local copy of shared data, and how much a read costs once
//! they are.
//!
//! # Operations
//!
//! - **Publish**: one fresh record written
//! - **Read**: a record read after it is known to be visible, checked for
//!   read-your-writes
//! - **Refresh**: time from publish completion until the reader observes it
//! - **Bulk publish**: a batch of fresh records written in one call
//!
//! # Data Output
//!
//! Runs produce a JSON report with per-backend statistics, cache counters
//! and the backends that could not be started.

pub mod harness;
pub mod metrics;
pub mod orchestrator;
pub mod reporter;

pub use harness::{BenchmarkHarness, IdSequence, MeasurementContext, BACKSTOP_GRACE};
pub use metrics::{
    BackendReport, BenchmarkReport, LatencyMetrics, LatencySample, OperationKind,
    OperationResult, SampleOutcome, SkippedBackend, SystemInfo,
};
pub use orchestrator::BenchmarkOrchestrator;
pub use reporter::{ComparisonTable, JsonReporter, ReporterError};
