use std::sync::Arc;
use std::time::Duration;

use harness::control::FaultTarget;
use harness::convergence::CountProbe;
use harness::error::ErrorKind;
use harness::failpoints::{FAULT_BEFORE_ACTION, WORKLOAD_BEFORE_INSERT_BATCH};
use harness::fault::{FaultAction, FaultTimeline};
use harness::scenario::{Failure, Scenario, ScenarioRunner, Verdict};
use harness::test_utils::failpoints::CustomFailScenario;
use harness::test_utils::pipeline::MemoryPipeline;
use harness::workload::insert_workers;
use telemetry::init_test_tracing;

#[tokio::test(start_paused = true)]
async fn failing_insert_batches_fail_their_workers() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(WORKLOAD_BEFORE_INSERT_BATCH, "return(write)")]);

    let pipeline = MemoryPipeline::new();
    let scenario = Scenario::builder("failing-inserts")
        .workers(insert_workers(2, 500, 100, Duration::ZERO))
        .probe(CountProbe::equal(pipeline.topic(), 0))
        .build()
        .unwrap();

    let outcome = ScenarioRunner::new(pipeline.clone(), Arc::new(pipeline.clone()))
        .run(scenario)
        .await;

    let Verdict::Fail { failures } = &outcome.verdict else {
        panic!("expected a failed verdict, got {:?}", outcome.verdict);
    };
    let worker_failures = failures
        .iter()
        .filter(|failure| matches!(
            failure,
            Failure::Worker { error, .. } if error.kind() == ErrorKind::WriteError
        ))
        .count();
    assert_eq!(worker_failures, 2);
    assert!(outcome.probes[0].converged);
}

#[tokio::test(start_paused = true)]
async fn failing_fault_action_aborts_the_timeline() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(FAULT_BEFORE_ACTION, "1*off->return(connection)")]);

    let pipeline = MemoryPipeline::new();
    let timeline = FaultTimeline::new()
        .then(FaultAction::kill(FaultTarget::Connector, Duration::from_secs(1)))
        .and_then(|t| t.then(FaultAction::start(FaultTarget::Connector, Duration::from_secs(2))))
        .unwrap();
    let scenario = Scenario::builder("failing-fault")
        .workers(insert_workers(1, 500, 100, Duration::ZERO))
        .timeline(timeline)
        .probe(CountProbe::at_least(pipeline.topic(), 500))
        .build()
        .unwrap();

    let outcome = ScenarioRunner::new(pipeline.clone(), Arc::new(pipeline.clone()))
        .run(scenario)
        .await;

    let Verdict::Aborted { error } = &outcome.verdict else {
        panic!("expected an aborted verdict, got {:?}", outcome.verdict);
    };
    assert_eq!(error.kind(), ErrorKind::FaultControlError);
    assert_eq!(outcome.timeline.executed.len(), 1);
    assert_eq!(outcome.timeline.abandoned.len(), 1);
    // The connector stays down because its start was abandoned.
    assert!(!pipeline.is_up(&FaultTarget::Connector).await);
}
