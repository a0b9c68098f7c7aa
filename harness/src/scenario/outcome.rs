use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::control::Resource;
use crate::convergence::{ConvergenceResult, CountProbe};
use crate::error::HarnessError;
use crate::fault::{ExecutedTimeline, FaultClass};
use crate::scenario::CoverageReport;
use crate::workload::{WorkerKey, WorkerResult};

/// Why a scenario that ran to completion did not pass.
#[derive(Debug, Clone)]
pub enum Failure {
    Worker { key: WorkerKey, error: HarnessError },
    Probe { probe: CountProbe, final_count: u64 },
    /// The probe's count query failed with an error that does not abort the scenario.
    ProbeQuery { probe: CountProbe, error: HarnessError },
    Coverage { resource: Resource, missing: usize },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Worker { key, error } => write!(f, "worker {key} failed: {}", error.description()),
            Failure::Probe { probe, final_count } => {
                write!(f, "probe {probe} did not converge, last count {final_count}")
            }
            Failure::ProbeQuery { probe, error } => {
                write!(f, "probe {probe} could not be queried: {}", error.description())
            }
            Failure::Coverage { resource, missing } => {
                write!(f, "{resource} is missing {missing} keys")
            }
        }
    }
}

/// Overall result of a scenario run.
#[derive(Debug, Clone)]
pub enum Verdict {
    Pass,
    Fail { failures: Vec<Failure> },
    /// The test infrastructure failed; assertions after the failure were not evaluated.
    Aborted { error: HarnessError },
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail { .. } => "fail",
            Verdict::Aborted { .. } => "aborted",
        }
    }
}

/// Everything observed during one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub name: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fault_class: FaultClass,
    pub expected_rows: u64,
    pub workers: Vec<WorkerResult>,
    pub timeline: ExecutedTimeline,
    pub probes: Vec<ConvergenceResult>,
    pub coverage: Vec<CoverageReport>,
    pub verdict: Verdict,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.verdict, Verdict::Aborted { .. })
    }

    pub fn probe(&self, resource: &Resource) -> Option<&ConvergenceResult> {
        self.probes.iter().find(|result| &result.probe.resource == resource)
    }

    /// Serializable view of the outcome for diagnostics.
    pub fn report(&self) -> ScenarioReport {
        let (failures, error) = match &self.verdict {
            Verdict::Pass => (Vec::new(), None),
            Verdict::Fail { failures } => (failures.iter().map(ToString::to_string).collect(), None),
            Verdict::Aborted { error } => (Vec::new(), Some(ErrorReport::from(error))),
        };

        let mut workers: Vec<WorkerReport> = self.workers.iter().map(WorkerReport::from).collect();
        workers.sort_by_key(|worker| (worker.kind.clone(), worker.id));

        ScenarioReport {
            name: self.name.clone(),
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            fault_class: self.fault_class,
            expected_rows: self.expected_rows,
            verdict: self.verdict.as_str(),
            failures,
            error,
            workers,
            timeline: self.timeline.clone(),
            probes: self.probes.clone(),
            coverage: self.coverage.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub description: String,
    pub detail: Option<String>,
}

impl From<&HarnessError> for ErrorReport {
    fn from(error: &HarnessError) -> Self {
        Self {
            kind: format!("{:?}", error.kind()),
            description: error.description().to_string(),
            detail: error.detail().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub kind: String,
    pub id: u32,
    pub target_count: u64,
    pub records: u64,
    pub elapsed_ms: u64,
    pub records_per_sec: u64,
    pub error: Option<ErrorReport>,
}

impl From<&WorkerResult> for WorkerReport {
    fn from(result: &WorkerResult) -> Self {
        Self {
            kind: result.key.kind.to_string(),
            id: result.key.id,
            target_count: result.target_count,
            records: result.records,
            elapsed_ms: result.elapsed.as_millis() as u64,
            records_per_sec: result.throughput() as u64,
            error: result.error.as_ref().map(ErrorReport::from),
        }
    }
}

/// JSON-friendly summary of a [`ScenarioOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fault_class: FaultClass,
    pub expected_rows: u64,
    pub verdict: &'static str,
    pub failures: Vec<String>,
    pub error: Option<ErrorReport>,
    pub workers: Vec<WorkerReport>,
    pub timeline: ExecutedTimeline,
    pub probes: Vec<ConvergenceResult>,
    pub coverage: Vec<CoverageReport>,
}

impl ScenarioReport {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;
    use crate::workload::WorkerKind;

    fn outcome(verdict: Verdict) -> ScenarioOutcome {
        let now = Utc::now();
        ScenarioOutcome {
            name: "basic".into(),
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            fault_class: FaultClass::None,
            expected_rows: 10,
            workers: vec![WorkerResult {
                key: WorkerKey {
                    kind: WorkerKind::Insert,
                    id: 1,
                },
                target_count: 10,
                records: 10,
                elapsed: Duration::from_secs(2),
                error: None,
            }],
            timeline: ExecutedTimeline::default(),
            probes: Vec::new(),
            coverage: Vec::new(),
            verdict,
        }
    }

    #[test]
    fn report_serializes_verdict_and_workers() {
        let report = outcome(Verdict::Pass).report();
        let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();

        assert_eq!(json["verdict"], "pass");
        assert_eq!(json["fault_class"]["class"], "none");
        assert_eq!(json["workers"][0]["kind"], "insert");
        assert_eq!(json["workers"][0]["records_per_sec"], 5);
    }

    #[test]
    fn aborted_report_carries_the_error() {
        let error = HarnessError::from((
            ErrorKind::FaultControlError,
            "Fault action could not be executed",
            "kill broker @ 2s".to_string(),
        ));
        let outcome = outcome(Verdict::Aborted { error });
        assert!(outcome.is_aborted());

        let report = outcome.report();
        let error = report.error.unwrap();
        assert_eq!(error.kind, "FaultControlError");
        assert_eq!(error.detail.as_deref(), Some("kill broker @ 2s"));
    }

    #[test]
    fn failures_render_readably() {
        let failure = Failure::Coverage {
            resource: Resource::Topic("person".into()),
            missing: 3,
        };
        assert_eq!(failure.to_string(), "topic:person is missing 3 keys");
    }
}
