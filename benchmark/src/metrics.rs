// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Standardized metrics types for benchmark results.
//!
//! This module defines the data structures used to capture and serialize
//! per-backend measurements and the run-level report.

use chrono::{DateTime, Utc};
use coherence_core::{BackendKind, CacheStatsSnapshot, HarnessConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::System;
use uuid::Uuid;

/// The operations the measurement engine knows how to time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Timed publish of one fresh record.
    Publish,
    /// Timed read of a record already visible.
    Read,
    /// Time from publish completion until a reader observes the write.
    Refresh,
    /// Timed publish of a batch of fresh records.
    BulkPublish,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Publish,
        OperationKind::Read,
        OperationKind::Refresh,
        OperationKind::BulkPublish,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            OperationKind::Publish => "publish",
            OperationKind::Read => "read",
            OperationKind::Refresh => "refresh",
            OperationKind::BulkPublish => "bulk_publish",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a single measured iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    Completed,
    /// Recorded at the operation timeout.
    TimedOut,
}

/// One measured iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySample {
    pub operation: OperationKind,
    pub iteration: u64,
    pub duration_ns: u64,
    pub outcome: SampleOutcome,
}

impl LatencySample {
    pub fn completed(operation: OperationKind, iteration: u64, elapsed: Duration) -> Self {
        Self {
            operation,
            iteration,
            duration_ns: saturating_nanos(elapsed),
            outcome: SampleOutcome::Completed,
        }
    }

    /// A sample recorded at `bound` for an operation that did not finish in time.
    pub fn timed_out(operation: OperationKind, iteration: u64, bound: Duration) -> Self {
        Self {
            operation,
            iteration,
            duration_ns: saturating_nanos(bound),
            outcome: SampleOutcome::TimedOut,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.outcome == SampleOutcome::TimedOut
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Latency metrics with statistical analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// Minimum observed latency in nanoseconds
    pub min_ns: u64,
    /// Maximum observed latency in nanoseconds
    pub max_ns: u64,
    /// Arithmetic mean latency in nanoseconds
    pub mean_ns: f64,
    /// Median (p50) latency in nanoseconds
    pub median_ns: u64,
    /// 95th percentile latency in nanoseconds
    pub p95_ns: u64,
    /// 99th percentile latency in nanoseconds
    pub p99_ns: u64,
    /// Sample variance in ns²
    pub variance_ns2: f64,
    /// Standard deviation in nanoseconds
    pub std_dev_ns: f64,
    /// Standard error of the mean in nanoseconds
    pub std_error_ns: f64,
}

impl LatencyMetrics {
    /// Calculate metrics from a vector of latency samples (in nanoseconds).
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self {
                min_ns: 0,
                max_ns: 0,
                mean_ns: 0.0,
                median_ns: 0,
                p95_ns: 0,
                p99_ns: 0,
                variance_ns2: 0.0,
                std_dev_ns: 0.0,
                std_error_ns: 0.0,
            };
        }

        samples.sort_unstable();
        let len = samples.len();

        let min_ns = samples[0];
        let max_ns = samples[len - 1];
        let sum: u128 = samples.iter().map(|&x| x as u128).sum();
        let mean_ns = sum as f64 / len as f64;
        let median_ns = samples[len / 2];
        let p95_ns = samples[percentile_index(len, 0.95)];
        let p99_ns = samples[percentile_index(len, 0.99)];

        // Bessel-corrected; a single sample has no spread.
        let variance_ns2 = if len > 1 {
            samples
                .iter()
                .map(|&x| {
                    let diff = x as f64 - mean_ns;
                    diff * diff
                })
                .sum::<f64>()
                / (len - 1) as f64
        } else {
            0.0
        };
        let std_dev_ns = variance_ns2.sqrt();
        let std_error_ns = std_dev_ns / (len as f64).sqrt();

        Self {
            min_ns,
            max_ns,
            mean_ns,
            median_ns,
            p95_ns,
            p99_ns,
            variance_ns2,
            std_dev_ns,
            std_error_ns,
        }
    }

    /// Format latency in human-readable form (auto-selects ns/μs/ms).
    pub fn format_latency(ns: u64) -> String {
        if ns < 1_000 {
            format!("{}ns", ns)
        } else if ns < 1_000_000 {
            format!("{:.2}μs", ns as f64 / 1_000.0)
        } else if ns < 1_000_000_000 {
            format!("{:.2}ms", ns as f64 / 1_000_000.0)
        } else {
            format!("{:.2}s", ns as f64 / 1_000_000_000.0)
        }
    }
}

fn percentile_index(len: usize, quantile: f64) -> usize {
    ((len as f64 * quantile) as usize).min(len - 1)
}

/// Measurements for one operation kind on one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation: OperationKind,
    /// Measured iterations attempted (after the floor was applied).
    pub iterations: u64,
    /// Samples that completed within the bound.
    pub successful: u64,
    /// Samples recorded at the bound.
    pub timeouts: u64,
    /// Iterations that failed without producing a sample.
    pub failures: u64,
    /// Statistics over completed and timed-out samples.
    pub latency: LatencyMetrics,
    /// Every recorded sample in iteration order, when raw samples are kept.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<LatencySample>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OperationResult {
    /// Summarize the samples of one measurement phase.
    pub fn from_samples(
        operation: OperationKind,
        iterations: u64,
        samples: Vec<LatencySample>,
        failures: u64,
        keep_samples: bool,
    ) -> Self {
        let timeouts = samples.iter().filter(|s| s.is_timed_out()).count() as u64;
        let successful = samples.len() as u64 - timeouts;
        let latency = LatencyMetrics::from_samples(samples.iter().map(|s| s.duration_ns).collect());

        Self {
            operation,
            iterations,
            successful,
            timeouts,
            failures,
            latency,
            samples: if keep_samples { samples } else { Vec::new() },
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the result. Values that do not serialize are skipped.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), value);
        }
        self
    }

    /// Number of samples the statistics were computed over.
    pub fn sample_count(&self) -> u64 {
        self.successful + self.timeouts
    }
}

/// Everything measured for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendReport {
    pub name: String,
    pub kind: BackendKind,
    pub operations: Vec<OperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_stats: Option<CacheStatsSnapshot>,
}

impl BackendReport {
    pub fn operation(&self, kind: OperationKind) -> Option<&OperationResult> {
        self.operations.iter().find(|r| r.operation == kind)
    }
}

/// A backend that never started, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedBackend {
    pub name: String,
    pub kind: BackendKind,
    pub reason: String,
}

/// Harness settings recorded alongside the results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub warmup_iterations: u32,
    pub warmup_min_ms: u64,
    pub iterations: u32,
    pub operation_timeout_ms: u64,
    pub bulk_size: usize,
    pub parallel_backends: bool,
}

impl From<&HarnessConfig> for RunSettings {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            warmup_iterations: config.warmup_iterations,
            warmup_min_ms: config.warmup_min.as_millis() as u64,
            iterations: config.iterations,
            operation_timeout_ms: config.operation_timeout.as_millis() as u64,
            bulk_size: config.bulk_size,
            parallel_backends: config.parallel_backends,
        }
    }
}

/// System information captured at benchmark time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system name
    pub os: String,
    /// OS version
    pub os_version: String,
    /// Kernel version (Linux)
    pub kernel_version: Option<String>,
    /// CPU model name
    pub cpu_model: String,
    /// Number of CPU cores
    pub cpu_cores: usize,
    /// Total system memory in bytes
    pub memory_bytes: u64,
    /// Hostname
    pub hostname: String,
}

impl SystemInfo {
    /// Collect current system information.
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        Self {
            os: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version(),
            cpu_model: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            cpu_cores: sys.cpus().len(),
            memory_bytes: sys.total_memory(),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// Complete run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Suite identifier
    pub benchmark_suite: String,
    /// Framework version
    pub version: String,
    /// Unique id of this run
    pub run_id: Uuid,
    /// Timestamp when the run started
    pub timestamp: DateTime<Utc>,
    pub system_info: SystemInfo,
    pub settings: RunSettings,
    pub backends: Vec<BackendReport>,
    #[serde(default)]
    pub skipped: Vec<SkippedBackend>,
}

impl BenchmarkReport {
    /// Create an empty report for a run with `settings`.
    pub fn new(settings: &HarnessConfig) -> Self {
        Self {
            benchmark_suite: "coherence-benchmarks".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            system_info: SystemInfo::collect(),
            settings: RunSettings::from(settings),
            backends: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn add_backend(&mut self, backend: BackendReport) {
        self.backends.push(backend);
    }

    pub fn backend(&self, name: &str) -> Option<&BackendReport> {
        self.backends.iter().find(|b| b.name == name)
    }
}
