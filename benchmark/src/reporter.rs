// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Report output: timestamped JSON files and a cross-backend text table.

use crate::metrics::{BenchmarkReport, LatencyMetrics, OperationKind};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Failed to create output directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON reporter for benchmark results.
pub struct JsonReporter {
    /// Output directory for benchmark data
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create a new JSON reporter with the specified output directory.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// Create a reporter using the default data directory.
    pub fn default_location() -> Result<Self, ReporterError> {
        let manifest_dir = env!("CARGO_MANIFEST_DIR");
        let data_dir = Path::new(manifest_dir).join("data");
        Self::new(data_dir)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Save a report as `coherence_<timestamp>_<run-id prefix>.json`.
    ///
    /// Returns the path to the created file.
    pub fn save(&self, report: &BenchmarkReport) -> Result<PathBuf, ReporterError> {
        let timestamp = report.timestamp.format("%Y-%m-%dT%H-%M-%SZ");
        let run = report.run_id.simple().to_string();
        let filename = format!("coherence_{}_{}.json", timestamp, &run[..8]);
        let filepath = self.output_dir.join(&filename);

        let file = File::create(&filepath)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, report)?;

        Ok(filepath)
    }

    /// List all existing benchmark files in the output directory.
    pub fn list_reports(&self) -> Result<Vec<PathBuf>, ReporterError> {
        let mut reports = Vec::new();
        for entry in fs::read_dir(&self.output_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                reports.push(path);
            }
        }
        reports.sort();
        Ok(reports)
    }

    /// Load an existing benchmark report from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<BenchmarkReport, ReporterError> {
        let file = File::open(path)?;
        let report = serde_json::from_reader(file)?;
        Ok(report)
    }
}

/// Side-by-side comparison of every backend in a report.
pub struct ComparisonTable;

impl ComparisonTable {
    const HEADERS: [&'static str; 10] = [
        "backend", "kind", "operation", "ok", "timeout", "failed", "median", "p95", "p99",
        "hit rate",
    ];

    /// Render one row per backend and operation, then the skipped backends.
    pub fn render(report: &BenchmarkReport) -> String {
        let mut rows: Vec<[String; 10]> = Vec::new();
        for backend in &report.backends {
            let hit_rate = backend
                .cache_stats
                .as_ref()
                .map(|s| format!("{:.1}%", s.hit_rate() * 100.0))
                .unwrap_or_else(|| "-".to_string());

            for kind in OperationKind::ALL {
                let Some(op) = backend.operation(kind) else {
                    continue;
                };
                let has_samples = op.sample_count() > 0;
                let stat = |ns: u64| {
                    if has_samples {
                        LatencyMetrics::format_latency(ns)
                    } else {
                        "-".to_string()
                    }
                };
                rows.push([
                    backend.name.clone(),
                    backend.kind.to_string(),
                    kind.to_string(),
                    op.successful.to_string(),
                    op.timeouts.to_string(),
                    op.failures.to_string(),
                    stat(op.latency.median_ns),
                    stat(op.latency.p95_ns),
                    stat(op.latency.p99_ns),
                    hit_rate.clone(),
                ]);
            }
        }

        let mut widths = Self::HEADERS.map(|h| h.chars().count());
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        push_row(&mut out, &Self::HEADERS.map(str::to_string), &widths);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        push_row(&mut out, &rule, &widths);
        for row in &rows {
            push_row(&mut out, row, &widths);
        }

        if !report.skipped.is_empty() {
            out.push('\n');
            out.push_str("skipped:\n");
            for skipped in &report.skipped {
                let _ = writeln!(out, "  {} ({}): {}", skipped.name, skipped.kind, skipped.reason);
            }
        }
        out
    }
}

fn push_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect();
    let _ = writeln!(out, "{}", line.join("  ").trim_end());
}
