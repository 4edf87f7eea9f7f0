// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Latency measurement engine.
//!
//! Runs a warmup phase whose samples are discarded, then a fixed number of
//! measured iterations of one operation kind against one adapter. Every
//! adapter call is wrapped in a backstop timeout so an adapter that ignores
//! its own bound cannot stall the phase.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use coherence_core::{
    BackendAdapter, CoherenceResult, HarnessConfig, InvariantViolation, ObservedVersion, Payload,
    Record, RecordId, VersionToken, VersionedRecord, MIN_MEASUREMENT_ITERATIONS,
};
use tracing::{debug, error, warn};

use crate::metrics::{LatencySample, OperationKind, OperationResult};

/// Extra time granted past the operation timeout before the engine gives up
/// on an adapter call itself.
pub const BACKSTOP_GRACE: Duration = Duration::from_millis(250);

/// Hands out record identities that are never reused within a run.
#[derive(Debug)]
pub struct IdSequence {
    prefix: String,
    next: AtomicU64,
}

impl IdSequence {
    pub fn new(prefix: impl Into<String>) -> CoherenceResult<Self> {
        let prefix = prefix.into();
        RecordId::new(prefix.as_str())?;
        Ok(Self {
            prefix,
            next: AtomicU64::new(0),
        })
    }

    pub fn next_id(&self) -> CoherenceResult<RecordId> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(RecordId::new(format!("{}-{}", self.prefix, n))?)
    }

    /// Identities handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// What a single iteration works with.
pub struct MeasurementContext<'a> {
    pub adapter: &'a dyn BackendAdapter,
    pub iteration: u64,
    pub ids: &'a IdSequence,
}

impl MeasurementContext<'_> {
    /// A record under a never-before-used identity.
    pub fn fresh_record(&self) -> CoherenceResult<Record> {
        let id = self.ids.next_id()?;
        let payload = Payload::new(format!("name-{}", id), self.iteration % 2 == 0);
        Ok(Record::new(id, payload))
    }
}

enum Timed<T> {
    Done(T, Duration),
    TimedOut,
}

/// The latency measurement engine.
#[derive(Debug, Clone)]
pub struct BenchmarkHarness {
    /// Number of warmup iterations before measurement
    warmup_iterations: u32,
    /// Warmup also lasts at least this long
    warmup_min: Duration,
    /// Number of measurement iterations
    measurement_iterations: u32,
    /// Bound handed to every adapter call
    operation_timeout: Duration,
    /// Records per bulk publish
    bulk_size: usize,
    /// Whether to keep raw sample data
    keep_raw_samples: bool,
}

impl BenchmarkHarness {
    /// Create a new benchmark harness with default settings.
    pub fn new() -> Self {
        Self::from_config(&HarnessConfig::default())
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            warmup_iterations: config.warmup_iterations,
            warmup_min: config.warmup_min,
            measurement_iterations: config.iterations,
            operation_timeout: config.operation_timeout,
            bulk_size: config.bulk_size,
            keep_raw_samples: config.keep_raw_samples,
        }
    }

    /// Set the number of warmup iterations.
    pub fn warmup(mut self, iterations: u32) -> Self {
        self.warmup_iterations = iterations;
        self
    }

    /// Set the minimum warmup duration.
    pub fn warmup_min(mut self, duration: Duration) -> Self {
        self.warmup_min = duration;
        self
    }

    /// Set the number of measurement iterations. Values below the floor are
    /// raised to it when the harness runs.
    pub fn iterations(mut self, iterations: u32) -> Self {
        self.measurement_iterations = iterations;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn bulk_size(mut self, size: usize) -> Self {
        self.bulk_size = size.max(1);
        self
    }

    /// Set whether to keep raw sample data.
    pub fn keep_samples(mut self, keep: bool) -> Self {
        self.keep_raw_samples = keep;
        self
    }

    /// Measured iterations actually performed.
    pub fn measured_iterations(&self) -> u32 {
        self.measurement_iterations.max(MIN_MEASUREMENT_ITERATIONS)
    }

    /// Outer bound on any single adapter call.
    pub fn backstop(&self) -> Duration {
        self.operation_timeout + BACKSTOP_GRACE
    }

    /// Warm up, then measure `kind` against `adapter`.
    ///
    /// Only an invariant violation is returned as an error; every other
    /// failure is counted against its iteration.
    pub async fn run(
        &self,
        adapter: &dyn BackendAdapter,
        ids: &IdSequence,
        kind: OperationKind,
    ) -> CoherenceResult<OperationResult> {
        let started = Instant::now();
        let mut iteration = 0u64;
        while iteration < u64::from(self.warmup_iterations) || started.elapsed() < self.warmup_min
        {
            let ctx = MeasurementContext {
                adapter,
                iteration,
                ids,
            };
            if let Err(e) = self.measure_once(&ctx, kind).await {
                if e.is_fatal() {
                    error!(backend = adapter.name(), operation = %kind, error = %e, "aborting during warmup");
                    return Err(e);
                }
                debug!(backend = adapter.name(), operation = %kind, error = %e, "warmup iteration failed");
            }
            iteration += 1;
        }
        debug!(
            backend = adapter.name(),
            operation = %kind,
            iterations = iteration,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "warmup complete"
        );

        let total = self.measured_iterations();
        let mut samples = Vec::with_capacity(total as usize);
        let mut failures = 0u64;

        for i in 0..u64::from(total) {
            let ctx = MeasurementContext {
                adapter,
                iteration: i,
                ids,
            };
            match self.measure_once(&ctx, kind).await {
                Ok(sample) => samples.push(sample),
                Err(e) if e.is_fatal() => {
                    error!(backend = adapter.name(), operation = %kind, iteration = i, error = %e, "aborting measurement");
                    return Err(e);
                }
                Err(e) => {
                    failures += 1;
                    warn!(backend = adapter.name(), operation = %kind, iteration = i, error = %e, "iteration failed");
                }
            }
        }

        let mut result = OperationResult::from_samples(
            kind,
            u64::from(total),
            samples,
            failures,
            self.keep_raw_samples,
        );
        if kind == OperationKind::BulkPublish {
            result = result.with_metadata("bulk_size", self.bulk_size);
        }
        Ok(result)
    }

    /// Perform one iteration of `kind` and return its sample.
    ///
    /// A timeout in any step, timed or not, yields a sample capped at the
    /// operation timeout.
    pub async fn measure_once(
        &self,
        ctx: &MeasurementContext<'_>,
        kind: OperationKind,
    ) -> CoherenceResult<LatencySample> {
        let adapter = ctx.adapter;
        let bound = self.operation_timeout;
        let capped = LatencySample::timed_out(kind, ctx.iteration, bound);

        let elapsed = match kind {
            OperationKind::Publish => {
                let record = ctx.fresh_record()?;
                match self
                    .timed(adapter.publish(std::slice::from_ref(&record), bound))
                    .await?
                {
                    Timed::Done(_, elapsed) => elapsed,
                    Timed::TimedOut => return Ok(capped),
                }
            }
            OperationKind::BulkPublish => {
                let records = (0..self.bulk_size)
                    .map(|_| ctx.fresh_record())
                    .collect::<CoherenceResult<Vec<_>>>()?;
                match self.timed(adapter.publish(&records, bound)).await? {
                    Timed::Done(_, elapsed) => elapsed,
                    Timed::TimedOut => return Ok(capped),
                }
            }
            OperationKind::Read => {
                let record = ctx.fresh_record()?;
                let Timed::Done(token, _) = self
                    .timed(adapter.publish(std::slice::from_ref(&record), bound))
                    .await?
                else {
                    return Ok(capped);
                };
                if let Timed::TimedOut = self
                    .timed(adapter.wait_for_visibility(&token, bound))
                    .await?
                {
                    return Ok(capped);
                }

                match self.timed(adapter.read(&record.id, bound)).await? {
                    Timed::Done(found, elapsed) => {
                        check_read_your_writes(adapter.name(), &record.id, token.version, found)?;
                        elapsed
                    }
                    Timed::TimedOut => return Ok(capped),
                }
            }
            OperationKind::Refresh => {
                let record = ctx.fresh_record()?;
                let Timed::Done(token, _) = self
                    .timed(adapter.publish(std::slice::from_ref(&record), bound))
                    .await?
                else {
                    return Ok(capped);
                };
                match self
                    .timed(adapter.wait_for_visibility(&token, bound))
                    .await?
                {
                    Timed::Done(_, elapsed) => elapsed,
                    Timed::TimedOut => return Ok(capped),
                }
            }
        };

        Ok(LatencySample::completed(kind, ctx.iteration, elapsed))
    }

    async fn timed<T, F>(&self, fut: F) -> CoherenceResult<Timed<T>>
    where
        F: Future<Output = CoherenceResult<T>>,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.backstop(), fut).await {
            Ok(Ok(value)) => Ok(Timed::Done(value, start.elapsed())),
            Ok(Err(e)) if e.is_timeout() => Ok(Timed::TimedOut),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    backstop_ms = self.backstop().as_millis() as u64,
                    "adapter overran its operation timeout"
                );
                Ok(Timed::TimedOut)
            }
        }
    }
}

impl Default for BenchmarkHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn check_read_your_writes(
    backend: &str,
    id: &RecordId,
    expected: VersionToken,
    found: Option<VersionedRecord>,
) -> CoherenceResult<()> {
    let observed = match found {
        Some(read) if read.version >= expected => return Ok(()),
        Some(read) => ObservedVersion::At(read.version),
        None => ObservedVersion::Missing,
    };
    Err(InvariantViolation {
        key: id.to_string(),
        expected,
        observed,
        context: format!("{}: read after visibility", backend),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_sequence_is_monotonic() {
        let ids = IdSequence::new("user").unwrap();
        let a = ids.next_id().unwrap();
        let b = ids.next_id().unwrap();
        assert_eq!(a.as_str(), "user-0");
        assert_eq!(b.as_str(), "user-1");
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn test_id_sequence_rejects_bad_prefix() {
        assert!(IdSequence::new("").is_err());
        assert!(IdSequence::new("has space").is_err());
    }

    #[test]
    fn test_iterations_clamped_to_floor() {
        let harness = BenchmarkHarness::new().iterations(1);
        assert_eq!(harness.measured_iterations(), MIN_MEASUREMENT_ITERATIONS);

        let harness = BenchmarkHarness::new().iterations(50);
        assert_eq!(harness.measured_iterations(), 50);
    }

    #[test]
    fn test_backstop_adds_grace() {
        let harness = BenchmarkHarness::new().operation_timeout(Duration::from_millis(10));
        assert_eq!(harness.backstop(), Duration::from_millis(260));
    }

    #[test]
    fn test_stale_read_is_violation() {
        let id = RecordId::new("u1").unwrap();
        let stale = VersionedRecord {
            record: Record::new(id.clone(), Payload::new("old", true)),
            version: VersionToken::new(3),
        };
        let err = check_read_your_writes("map", &id, VersionToken::new(4), Some(stale))
            .unwrap_err();
        assert!(err.is_fatal());

        let err = check_read_your_writes("map", &id, VersionToken::new(4), None).unwrap_err();
        assert!(err.to_string().contains("<missing>"));
    }

    #[test]
    fn test_fresh_read_passes() {
        let id = RecordId::new("u1").unwrap();
        let read = VersionedRecord {
            record: Record::new(id.clone(), Payload::new("new", true)),
            version: VersionToken::new(5),
        };
        assert!(check_read_your_writes("map", &id, VersionToken::new(4), Some(read)).is_ok());
    }
}
