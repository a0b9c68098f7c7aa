use std::sync::Arc;
use std::time::Duration;

use harness::control::{ClusterControl, FaultTarget, Resource};
use harness::convergence::{ConvergenceChecker, CountProbe};
use harness::test_utils::pipeline::{MemoryPipeline, PipelineSettings};
use harness::workload::{RowGenerator, RowSource, RowSourceFactory, WorkerSpec};
use telemetry::init_test_tracing;
use tokio::time::Instant;

async fn write_rows(pipeline: &MemoryPipeline, count: u64) {
    let spec = WorkerSpec::insert(1, count, count);
    let mut source = pipeline.connect(spec.key()).await.unwrap();
    let rows = RowGenerator::new(&spec).batch(0, count);
    source.insert(&rows).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_resource_converges_on_the_first_sample() {
    init_test_tracing();
    let pipeline = Arc::new(MemoryPipeline::new());
    let checker = ConvergenceChecker::new(pipeline);

    let probe = CountProbe::equal(Resource::Topic("empty".into()), 0);
    let result = checker
        .wait_for(&probe, Duration::from_secs(1), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.final_count, 0);
    assert_eq!(result.samples.len(), 1);
    assert_eq!(result.elapsed, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn unmet_probe_times_out_within_one_interval() {
    init_test_tracing();
    let pipeline = Arc::new(MemoryPipeline::new());
    write_rows(&pipeline, 100).await;
    let checker = ConvergenceChecker::new(pipeline.clone());
    let start = Instant::now();

    let interval = Duration::from_secs(2);
    let timeout = Duration::from_secs(7);
    let result = checker
        .wait_for(&CountProbe::equal(pipeline.topic(), 1_000), interval, timeout)
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(result.final_count, 100);
    assert!(start.elapsed() <= timeout + interval);
    assert!(result.samples.windows(2).all(|pair| pair[0].at < pair[1].at));
}

#[tokio::test(start_paused = true)]
async fn stable_resource_reports_the_same_count_twice() {
    init_test_tracing();
    let pipeline = Arc::new(MemoryPipeline::new());
    write_rows(&pipeline, 700).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let checker = ConvergenceChecker::new(pipeline.clone());
    let probe = CountProbe::at_most(pipeline.topic(), 1_000);
    let interval = Duration::from_secs(1);
    let timeout = Duration::from_secs(10);

    let first = checker.wait_for(&probe, interval, timeout).await.unwrap();
    let second = checker.wait_for(&probe, interval, timeout).await.unwrap();

    assert!(first.converged && second.converged);
    assert_eq!(first.final_count, 700);
    assert_eq!(first.final_count, second.final_count);
}

#[tokio::test(start_paused = true)]
async fn lost_connections_skip_samples_without_failing() {
    init_test_tracing();
    let pipeline = Arc::new(MemoryPipeline::new());
    write_rows(&pipeline, 300).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    pipeline.fail_count_queries(3).await;

    let checker = ConvergenceChecker::new(pipeline.clone());
    let result = checker
        .wait_for(
            &CountProbe::equal(pipeline.topic(), 300),
            Duration::from_secs(1),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.samples.len(), 1);
    assert_eq!(result.samples[0].at, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn sink_catches_up_after_connector_restart() {
    init_test_tracing();
    let pipeline = Arc::new(MemoryPipeline::with_settings(PipelineSettings {
        sink: Some(("sink".into(), "topics/person".into())),
        ..Default::default()
    }));
    pipeline.stop(&FaultTarget::Connector, true).await.unwrap();
    write_rows(&pipeline, 2_000).await;

    let restarter = pipeline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        restarter.start(&FaultTarget::Connector).await.unwrap();
    });

    let checker = ConvergenceChecker::new(pipeline.clone());
    let sink = pipeline.sink().unwrap();
    let result = checker
        .wait_for(
            &CountProbe::equal(sink, 2_000),
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

    assert!(result.converged);
    assert!(result.elapsed >= Duration::from_secs(3));
    assert_eq!(result.samples[0].count, 0);
}
