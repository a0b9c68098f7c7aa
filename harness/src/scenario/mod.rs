//! Scenario declaration, execution and verdicts.

mod coverage;
mod outcome;
mod policy;
mod runner;

use std::collections::BTreeMap;
use std::time::Duration;

use config::shared::{ConvergenceConfig, WorkloadConfig};
use tracing::warn;

pub use coverage::{CoverageReport, KeyCoverage};
pub use outcome::{ErrorReport, Failure, ScenarioOutcome, ScenarioReport, Verdict, WorkerReport};
pub use policy::DeliveryPolicy;
pub use runner::ScenarioRunner;

use crate::bail;
use crate::convergence::CountProbe;
use crate::error::{ErrorKind, HarnessResult};
use crate::fault::{FaultClass, FaultTimeline, ProducerPath};
use crate::workload::{WorkerKind, WorkerSpec, insert_workers, select_workers};

/// A validated test case: workload, fault timeline and the assertions to check afterwards.
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    workers: Vec<WorkerSpec>,
    timeline: FaultTimeline,
    probes: Vec<CountProbe>,
    coverage: Vec<KeyCoverage>,
    producer_path: ProducerPath,
    poll_interval: Duration,
    probe_timeout: Duration,
    scenario_timeout: Duration,
}

impl Scenario {
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> &[WorkerSpec] {
        &self.workers
    }

    pub fn timeline(&self) -> &FaultTimeline {
        &self.timeline
    }

    pub fn probes(&self) -> &[CountProbe] {
        &self.probes
    }

    pub fn coverage(&self) -> &[KeyCoverage] {
        &self.coverage
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn scenario_timeout(&self) -> Duration {
        self.scenario_timeout
    }

    pub fn fault_class(&self) -> FaultClass {
        self.timeline.fault_class_for(self.producer_path)
    }

    /// Rows the insert workers write in total, the baseline of every count assertion.
    pub fn expected_rows(&self) -> u64 {
        expected_rows(&self.workers)
    }
}

/// Sum of insert targets; select workers never add rows.
pub fn expected_rows(workers: &[WorkerSpec]) -> u64 {
    workers
        .iter()
        .filter(|spec| spec.kind == WorkerKind::Insert)
        .map(|spec| spec.target_count)
        .sum()
}

/// Builder for [`Scenario`]; [`ScenarioBuilder::build`] checks the declaration.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    name: String,
    workers: Vec<WorkerSpec>,
    timeline: FaultTimeline,
    probes: Vec<CountProbe>,
    coverage: Vec<KeyCoverage>,
    producer_path: ProducerPath,
    poll_interval: Duration,
    probe_timeout: Duration,
    scenario_timeout: Duration,
}

impl ScenarioBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: Vec::new(),
            timeline: FaultTimeline::new(),
            probes: Vec::new(),
            coverage: Vec::new(),
            producer_path: ProducerPath::default(),
            poll_interval: Duration::from_millis(ConvergenceConfig::DEFAULT_POLL_INTERVAL_MS),
            probe_timeout: Duration::from_millis(ConvergenceConfig::DEFAULT_TIMEOUT_MS),
            scenario_timeout: Duration::from_millis(ConvergenceConfig::DEFAULT_SCENARIO_TIMEOUT_MS),
        }
    }

    pub fn worker(mut self, spec: WorkerSpec) -> Self {
        self.workers.push(spec);
        self
    }

    pub fn workers(mut self, specs: impl IntoIterator<Item = WorkerSpec>) -> Self {
        self.workers.extend(specs);
        self
    }

    /// Adds the insert and select workers described by a workload config.
    pub fn workload(self, config: &WorkloadConfig) -> Self {
        let reads = config.rows_per_worker.div_ceil(config.batch_size.max(1));
        self.workers(insert_workers(
            config.insert_workers,
            config.rows_per_worker,
            config.batch_size,
            Duration::from_millis(config.stagger_ms),
        ))
        .workers(select_workers(
            config.select_workers,
            reads,
            config.batch_size,
        ))
    }

    pub fn timeline(mut self, timeline: FaultTimeline) -> Self {
        self.timeline = timeline;
        self
    }

    pub fn probe(mut self, probe: CountProbe) -> Self {
        self.probes.push(probe);
        self
    }

    /// Adds a probe whose timeout is a degraded observation rather than a failure.
    pub fn observe(self, probe: CountProbe) -> Self {
        self.probe(probe.observed())
    }

    pub fn coverage(mut self, coverage: KeyCoverage) -> Self {
        self.coverage.push(coverage);
        self
    }

    pub fn producer_path(mut self, producer_path: ProducerPath) -> Self {
        self.producer_path = producer_path;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn scenario_timeout(mut self, scenario_timeout: Duration) -> Self {
        self.scenario_timeout = scenario_timeout;
        self
    }

    /// Takes polling cadence and both timeouts from the config.
    pub fn convergence(self, config: &ConvergenceConfig) -> Self {
        self.poll_interval(config.poll_interval())
            .probe_timeout(config.timeout())
            .scenario_timeout(config.scenario_timeout())
    }

    pub fn build(self) -> HarnessResult<Scenario> {
        if self.poll_interval.is_zero() {
            bail!(
                ErrorKind::InvalidScenario,
                "Poll interval must be greater than zero",
                self.name
            );
        }

        if self.scenario_timeout.is_zero() {
            bail!(
                ErrorKind::InvalidScenario,
                "Scenario timeout must be greater than zero",
                self.name
            );
        }

        validate_workers(&self.workers)?;

        let scenario = Scenario {
            name: self.name,
            workers: self.workers,
            timeline: self.timeline,
            probes: self.probes,
            coverage: self.coverage,
            producer_path: self.producer_path,
            poll_interval: self.poll_interval,
            probe_timeout: self.probe_timeout,
            scenario_timeout: self.scenario_timeout,
        };

        let class = scenario.fault_class();
        for probe in &scenario.probes {
            if probe.must_converge && DeliveryPolicy::is_flaky(class, probe.comparison) {
                warn!(
                    scenario = %scenario.name,
                    probe = %probe,
                    fault_class = ?class,
                    "assertion is stricter than the fault class guarantees and may be flaky"
                );
            }
        }

        Ok(scenario)
    }
}

/// Worker ids must be unique and dense from 1 within each kind.
fn validate_workers(workers: &[WorkerSpec]) -> HarnessResult<()> {
    let mut ids: BTreeMap<WorkerKind, Vec<u32>> = BTreeMap::new();

    for spec in workers {
        if spec.batch_size == 0 {
            bail!(
                ErrorKind::InvalidScenario,
                "Worker batch size must be greater than zero",
                spec.key()
            );
        }
        ids.entry(spec.kind).or_default().push(spec.id);
    }

    for (kind, mut kind_ids) in ids {
        kind_ids.sort_unstable();
        let dense = kind_ids
            .iter()
            .enumerate()
            .all(|(index, id)| *id as usize == index + 1);

        if !dense {
            bail!(
                ErrorKind::InvalidScenario,
                "Worker ids must be unique and numbered from 1 without gaps",
                format!("{kind} ids: {kind_ids:?}")
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{FaultTarget, Resource};
    use crate::fault::FaultAction;

    #[test]
    fn expected_rows_ignores_select_workers() {
        let scenario = Scenario::builder("mixed")
            .workers(insert_workers(4, 10_000, 100, Duration::ZERO))
            .workers(select_workers(2, 50, 10))
            .build()
            .unwrap();

        assert_eq!(scenario.expected_rows(), 40_000);
        assert_eq!(scenario.fault_class(), FaultClass::None);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Scenario::builder("dup")
            .worker(WorkerSpec::insert(1, 10, 5))
            .worker(WorkerSpec::insert(1, 10, 5))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidScenario);
    }

    #[test]
    fn gaps_in_ids_are_rejected() {
        let err = Scenario::builder("gap")
            .worker(WorkerSpec::insert(1, 10, 5))
            .worker(WorkerSpec::insert(3, 10, 5))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidScenario);
    }

    #[test]
    fn ids_are_counted_per_kind() {
        Scenario::builder("per-kind")
            .worker(WorkerSpec::insert(1, 10, 5))
            .worker(WorkerSpec::select(1, 10, 5))
            .build()
            .unwrap();
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Scenario::builder("zero")
            .worker(WorkerSpec::insert(1, 10, 0))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidScenario);
    }

    #[test]
    fn workload_config_expands_into_workers() {
        let config = WorkloadConfig {
            insert_workers: 3,
            select_workers: 1,
            rows_per_worker: 250,
            batch_size: 100,
            stagger_ms: 0,
        };
        let scenario = Scenario::builder("from-config")
            .workload(&config)
            .build()
            .unwrap();

        assert_eq!(scenario.workers().len(), 4);
        assert_eq!(scenario.expected_rows(), config.expected_rows());
    }

    #[test]
    fn direct_producers_change_the_fault_class() {
        let timeline = FaultTimeline::new()
            .then(FaultAction::kill(FaultTarget::Broker, Duration::from_secs(1)))
            .unwrap();
        let scenario = Scenario::builder("nodb")
            .worker(WorkerSpec::insert(1, 10, 5))
            .timeline(timeline)
            .producer_path(ProducerPath::Broker)
            .probe(CountProbe::at_most(Resource::Topic("person".into()), 10))
            .build()
            .unwrap();

        assert_eq!(scenario.fault_class(), FaultClass::ProducerSideKill);
    }
}
