use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, TokioClock};
use crate::control::{ClusterControl, KeyReader};
use crate::convergence::{ConvergenceChecker, ConvergenceResult};
use crate::error::{ErrorKind, HarnessError};
use crate::fault::{ExecutedTimeline, FaultInjector};
use crate::harness_error;
use crate::scenario::{CoverageReport, Failure, Scenario, ScenarioOutcome, Verdict};
use crate::workload::{RowSourceFactory, WorkerResult, WorkloadDriver};

/// Executes [`Scenario`]s against a row source and a cluster.
///
/// The workload and the fault timeline run concurrently from a shared start instant. Once
/// both are done the count probes are checked one after the other, then key coverage.
#[derive(Debug)]
pub struct ScenarioRunner<F, K, C = TokioClock> {
    factory: F,
    control: Arc<K>,
    clock: C,
    query_timeout: Option<Duration>,
}

impl<F, K> ScenarioRunner<F, K, TokioClock>
where
    F: RowSourceFactory,
    K: ClusterControl + KeyReader,
{
    pub fn new(factory: F, control: Arc<K>) -> Self {
        Self::with_clock(factory, control, TokioClock::new())
    }
}

impl<F, K, C> ScenarioRunner<F, K, C>
where
    F: RowSourceFactory,
    K: ClusterControl + KeyReader,
    C: Clock,
{
    pub fn with_clock(factory: F, control: Arc<K>, clock: C) -> Self {
        Self {
            factory,
            control,
            clock,
            query_timeout: None,
        }
    }

    /// Bounds each count query issued by the probes.
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = Some(query_timeout);
        self
    }

    /// Runs the scenario to a verdict. Never returns an error: infrastructure failures
    /// become [`Verdict::Aborted`].
    pub async fn run(&self, scenario: Scenario) -> ScenarioOutcome {
        let run_id = Uuid::new_v4();
        let fault_class = scenario.fault_class();
        let mut outcome = ScenarioOutcome {
            name: scenario.name().to_string(),
            run_id,
            started_at: self.clock.wall_now(),
            finished_at: self.clock.wall_now(),
            fault_class,
            expected_rows: scenario.expected_rows(),
            workers: Vec::new(),
            timeline: ExecutedTimeline::default(),
            probes: Vec::new(),
            coverage: Vec::new(),
            verdict: Verdict::Pass,
        };

        info!(
            scenario = scenario.name(),
            %run_id,
            fault_class = ?fault_class,
            workers = scenario.workers().len(),
            fault_actions = scenario.timeline().len(),
            expected_rows = outcome.expected_rows,
            "starting scenario"
        );

        if let Err(error) = self.run_phase(&scenario, &mut outcome).await {
            return self.finish(outcome, Verdict::Aborted { error });
        }

        let probe_failures = match self.check_probes(&scenario, &mut outcome.probes).await {
            Ok(probe_failures) => probe_failures,
            Err(error) => return self.finish(outcome, Verdict::Aborted { error }),
        };

        for coverage in scenario.coverage() {
            match self.control.read_keys(&coverage.resource, &coverage.field).await {
                Ok(keys) => outcome.coverage.push(coverage.analyze(&keys)),
                Err(error) => {
                    error!(resource = %coverage.resource, error = %error, "failed to read keys");
                    return self.finish(outcome, Verdict::Aborted { error });
                }
            }
        }

        let failures = collect_failures(
            &outcome.workers,
            &outcome.probes,
            probe_failures,
            &outcome.coverage,
        );
        let verdict = if failures.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail { failures }
        };

        self.finish(outcome, verdict)
    }

    /// Runs the workload and the fault timeline concurrently under the scenario timeout.
    async fn run_phase(&self, scenario: &Scenario, outcome: &mut ScenarioOutcome) -> Result<(), HarnessError> {
        let mut driver = WorkloadDriver::new(self.factory.clone());
        let injector = FaultInjector::with_clock(self.control.clone(), self.clock.clone());

        let start = self.clock.now();
        driver.spawn(scenario.workers().to_vec());

        let timeline = scenario.timeline();
        let phase = async {
            tokio::join!(
                injector.run_into(timeline, start, &mut outcome.timeline),
                driver.join_all()
            )
        };

        let completed = tokio::select! {
            completed = phase => Some(completed),
            _ = self.clock.sleep_until(start + scenario.scenario_timeout()) => None,
        };

        match completed {
            Some((faults, workers)) => {
                outcome.workers = workers;
                faults
            }
            None => {
                driver.abort_all();
                outcome.workers = driver.join_all().await;

                let remaining = scenario
                    .timeline()
                    .actions()
                    .iter()
                    .skip(outcome.timeline.executed.len())
                    .cloned();
                outcome.timeline.abandoned.extend(remaining);

                warn!(
                    scenario = scenario.name(),
                    timeout_ms = scenario.scenario_timeout().as_millis() as u64,
                    "scenario timed out, workers aborted"
                );
                Err(harness_error!(
                    ErrorKind::ScenarioTimedOut,
                    "Scenario did not finish its workload and fault phase in time",
                    scenario.name()
                ))
            }
        }
    }

    /// Checks every probe in order.
    ///
    /// Query errors that do not escalate are returned as failures of their probe and the
    /// remaining probes still run. Escalating errors abort the check.
    async fn check_probes(
        &self,
        scenario: &Scenario,
        results: &mut Vec<ConvergenceResult>,
    ) -> Result<Vec<Failure>, HarnessError> {
        let mut checker = ConvergenceChecker::with_clock(self.control.clone(), self.clock.clone());
        if let Some(query_timeout) = self.query_timeout {
            checker = checker.with_query_timeout(query_timeout);
        }

        let mut failures = Vec::new();
        for probe in scenario.probes() {
            match checker
                .wait_for(probe, scenario.poll_interval(), scenario.probe_timeout())
                .await
            {
                Ok(result) => results.push(result),
                Err(error) if error.kind().escalates() => return Err(error),
                Err(error) => {
                    error!(probe = %probe, error = %error, "probe query failed");
                    failures.push(Failure::ProbeQuery {
                        probe: probe.clone(),
                        error,
                    });
                }
            }
        }

        Ok(failures)
    }

    fn finish(&self, mut outcome: ScenarioOutcome, verdict: Verdict) -> ScenarioOutcome {
        outcome.finished_at = self.clock.wall_now();
        outcome.verdict = verdict;

        match &outcome.verdict {
            Verdict::Pass => info!(scenario = %outcome.name, run_id = %outcome.run_id, "scenario passed"),
            Verdict::Fail { failures } => {
                for failure in failures {
                    error!(scenario = %outcome.name, %failure, "scenario assertion failed");
                }
                error!(
                    scenario = %outcome.name,
                    run_id = %outcome.run_id,
                    failures = failures.len(),
                    "scenario failed"
                );
            }
            Verdict::Aborted { error } => error!(
                scenario = %outcome.name,
                run_id = %outcome.run_id,
                error = %error,
                "scenario aborted"
            ),
        }

        outcome
    }
}

fn collect_failures(
    workers: &[WorkerResult],
    probes: &[ConvergenceResult],
    probe_failures: Vec<Failure>,
    coverage: &[CoverageReport],
) -> Vec<Failure> {
    let mut failures = Vec::new();

    for worker in workers {
        if let Some(error) = &worker.error {
            failures.push(Failure::Worker {
                key: worker.key,
                error: error.clone(),
            });
        }
    }

    for result in probes.iter().filter(|result| !result.converged) {
        if !result.probe.must_converge {
            info!(
                probe = %result.probe,
                final_count = result.final_count,
                "observed probe did not converge"
            );
            continue;
        }

        failures.push(Failure::Probe {
            probe: result.probe.clone(),
            final_count: result.final_count,
        });
    }

    failures.extend(probe_failures);

    for report in coverage.iter().filter(|report| !report.passed()) {
        failures.push(Failure::Coverage {
            resource: report.coverage.resource.clone(),
            missing: report.missing.len(),
        });
    }

    failures
}
