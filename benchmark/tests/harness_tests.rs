// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Measurement engine behavior against scripted adapters.

mod common;

use std::time::{Duration, Instant};

use coherence_benchmark::{BenchmarkHarness, IdSequence, OperationKind, SampleOutcome};
use common::{Behavior, MockAdapter};

const LATENCY: Duration = Duration::from_millis(2);

#[tokio::test]
async fn test_fixed_latency_adapter_measures_its_latency() {
    let adapter = MockAdapter::new("fixed", LATENCY, Behavior::Healthy);
    let ids = IdSequence::new("user").unwrap();
    let harness = BenchmarkHarness::new()
        .warmup(3)
        .iterations(20)
        .bulk_size(10)
        .operation_timeout(Duration::from_secs(1));

    for kind in OperationKind::ALL {
        let result = harness.run(&adapter, &ids, kind).await.unwrap();
        let again = harness.run(&adapter, &ids, kind).await.unwrap();

        // Same adapter, same settings: same shape on every run.
        assert_eq!(result.successful, again.successful, "{}", kind);
        assert_eq!(result.timeouts, again.timeouts, "{}", kind);
        assert_eq!(result.failures, again.failures, "{}", kind);
        let shape = |r: &coherence_benchmark::OperationResult| {
            r.samples
                .iter()
                .map(|s| (s.iteration, s.outcome))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&result), shape(&again), "{}", kind);
        assert!(again.latency.min_ns >= LATENCY.as_nanos() as u64, "{}", kind);

        assert_eq!(result.operation, kind);
        assert_eq!(result.successful, 20, "{}", kind);
        assert_eq!(result.timeouts, 0, "{}", kind);
        assert_eq!(result.failures, 0, "{}", kind);
        assert!(
            result.latency.min_ns >= LATENCY.as_nanos() as u64,
            "{}: min {}ns below the adapter latency",
            kind,
            result.latency.min_ns
        );
        assert!(
            result.latency.median_ns < Duration::from_millis(50).as_nanos() as u64,
            "{}: median {}ns",
            kind,
            result.latency.median_ns
        );
        assert!(result.latency.p99_ns <= result.latency.max_ns);
    }
}

#[tokio::test]
async fn test_bulk_publish_records_batch_size() {
    let adapter = MockAdapter::new("fixed", Duration::ZERO, Behavior::Healthy);
    let ids = IdSequence::new("user").unwrap();
    let harness = BenchmarkHarness::new().warmup(0).iterations(5).bulk_size(25);

    let result = harness
        .run(&adapter, &ids, OperationKind::BulkPublish)
        .await
        .unwrap();
    assert_eq!(result.metadata["bulk_size"].as_u64(), Some(25));
    assert_eq!(ids.issued(), 5 * 25);
}

#[tokio::test]
async fn test_iterations_below_floor_are_raised() {
    let adapter = MockAdapter::new("fixed", Duration::ZERO, Behavior::Healthy);
    let ids = IdSequence::new("user").unwrap();
    let harness = BenchmarkHarness::new().warmup(0).iterations(1);

    let result = harness
        .run(&adapter, &ids, OperationKind::Publish)
        .await
        .unwrap();
    assert_eq!(result.iterations, 5);
    assert_eq!(result.successful, 5);
}

#[tokio::test]
async fn test_warmup_runs_for_minimum_duration() {
    let adapter = MockAdapter::new("fixed", LATENCY, Behavior::Healthy);
    let ids = IdSequence::new("user").unwrap();
    let harness = BenchmarkHarness::new()
        .warmup(0)
        .warmup_min(Duration::from_millis(30))
        .iterations(5);

    let started = Instant::now();
    let result = harness
        .run(&adapter, &ids, OperationKind::Publish)
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(30));
    // Warmup samples are discarded, but their identities were consumed.
    assert_eq!(result.successful, 5);
    assert!(ids.issued() > 5);
}

#[tokio::test]
async fn test_reported_timeout_is_capped_sample() {
    let adapter = MockAdapter::new("polite", Duration::ZERO, Behavior::ReportTimeout);
    let ids = IdSequence::new("user").unwrap();
    let bound = Duration::from_millis(20);
    let harness = BenchmarkHarness::new()
        .warmup(0)
        .iterations(5)
        .operation_timeout(bound);

    let result = harness
        .run(&adapter, &ids, OperationKind::Publish)
        .await
        .unwrap();
    assert_eq!(result.timeouts, 5);
    assert_eq!(result.successful, 0);
    assert_eq!(result.sample_count(), 5);
    assert_eq!(result.latency.min_ns, bound.as_nanos() as u64);
    assert_eq!(result.latency.max_ns, bound.as_nanos() as u64);
}

#[tokio::test]
async fn test_stuck_adapter_hits_backstop() {
    let adapter = MockAdapter::new("stuck", Duration::ZERO, Behavior::IgnoreTimeout);
    let ids = IdSequence::new("user").unwrap();
    let bound = Duration::from_millis(20);
    let harness = BenchmarkHarness::new()
        .warmup(0)
        .iterations(5)
        .operation_timeout(bound);

    let started = Instant::now();
    let result = harness
        .run(&adapter, &ids, OperationKind::Publish)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.timeouts, 5);
    assert_eq!(result.latency.max_ns, bound.as_nanos() as u64);
}

#[tokio::test]
async fn test_setup_timeout_is_capped_sample() {
    // Read and refresh publish before the timed step; a timeout there still
    // records a sample at the bound.
    let adapter = MockAdapter::new("polite", Duration::ZERO, Behavior::ReportTimeout);
    let ids = IdSequence::new("user").unwrap();
    let bound = Duration::from_millis(20);
    let harness = BenchmarkHarness::new()
        .warmup(0)
        .iterations(5)
        .operation_timeout(bound);

    for kind in [OperationKind::Read, OperationKind::Refresh] {
        let result = harness.run(&adapter, &ids, kind).await.unwrap();
        assert_eq!(result.timeouts, 5, "{}", kind);
        assert_eq!(result.failures, 0, "{}", kind);
        assert_eq!(result.sample_count(), 5, "{}", kind);
        assert_eq!(result.latency.max_ns, bound.as_nanos() as u64, "{}", kind);
    }
}

#[tokio::test]
async fn test_samples_follow_iteration_order() {
    let ids = IdSequence::new("user").unwrap();
    let bound = Duration::from_millis(20);
    let harness = BenchmarkHarness::new()
        .warmup(2)
        .iterations(8)
        .operation_timeout(bound)
        .keep_samples(true);

    let healthy = MockAdapter::new("fixed", Duration::ZERO, Behavior::Healthy);
    let result = harness
        .run(&healthy, &ids, OperationKind::Publish)
        .await
        .unwrap();
    let iterations: Vec<u64> = result.samples.iter().map(|s| s.iteration).collect();
    assert_eq!(iterations, (0..8).collect::<Vec<_>>());
    assert!(result
        .samples
        .iter()
        .all(|s| s.outcome == SampleOutcome::Completed && s.operation == OperationKind::Publish));

    let polite = MockAdapter::new("polite", Duration::ZERO, Behavior::ReportTimeout);
    let result = harness
        .run(&polite, &ids, OperationKind::Publish)
        .await
        .unwrap();
    assert_eq!(result.samples.len(), 8);
    for (i, sample) in result.samples.iter().enumerate() {
        assert_eq!(sample.iteration, i as u64);
        assert_eq!(sample.outcome, SampleOutcome::TimedOut);
        assert_eq!(sample.duration_ns, bound.as_nanos() as u64);
    }
}

#[tokio::test]
async fn test_samples_dropped_when_not_kept() {
    let adapter = MockAdapter::new("fixed", Duration::ZERO, Behavior::Healthy);
    let ids = IdSequence::new("user").unwrap();
    let harness = BenchmarkHarness::new()
        .warmup(0)
        .iterations(5)
        .keep_samples(false);

    let result = harness
        .run(&adapter, &ids, OperationKind::Publish)
        .await
        .unwrap();
    assert!(result.samples.is_empty());
    assert_eq!(result.sample_count(), 5);
}

#[tokio::test]
async fn test_lost_write_is_invariant_violation() {
    let adapter = MockAdapter::new("liar", Duration::ZERO, Behavior::LoseWrites);
    let ids = IdSequence::new("user").unwrap();
    let harness = BenchmarkHarness::new().warmup(0).iterations(5);

    let err = harness
        .run(&adapter, &ids, OperationKind::Read)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("user-0"));
}
