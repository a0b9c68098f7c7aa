use std::time::Duration;

use clap::{Args, Subcommand};
use config::shared::{ConvergenceConfig, ScenarioContext, WorkloadConfig};
use harness::control::{FaultTarget, Resource};
use harness::bail;
use harness::error::{ErrorKind, HarnessResult};
use harness::fault::{FaultAction, FaultTimeline};
use harness::scenario::{DeliveryPolicy, KeyCoverage, Scenario, expected_rows};
use harness::workload::{PidMode, WorkerSpec};

/// Scenarios the runner knows how to declare.
///
/// Fault offsets are measured from the moment the workload starts, so with the default
/// workload every fault lands while rows are still being written.
#[derive(Debug, Clone, Subcommand)]
pub(crate) enum ScenarioCommand {
    /// Writes the workload with no faults; the topic must hold exactly the inserted rows.
    Basic,
    /// Gracefully stops the connector and the broker mid-ingest, then starts them again.
    BrokerStop {
        /// Seconds after workload start to stop the pipeline.
        #[arg(long, default_value = "10")]
        at_secs: u64,
        /// Seconds the pipeline stays down.
        #[arg(long, default_value = "10")]
        down_secs: u64,
    },
    /// Kills the broker process mid-ingest, then starts it again.
    BrokerKill {
        #[arg(long, default_value = "10")]
        at_secs: u64,
        #[arg(long, default_value = "10")]
        down_secs: u64,
    },
    /// Powers off a VM of the pipeline, then starts it again.
    VmStop {
        /// Provider instance name of the VM.
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "10")]
        at_secs: u64,
        #[arg(long, default_value = "60")]
        down_secs: u64,
    },
    /// Restarts the connector mid-ingest.
    ConnectorRestart {
        #[arg(long, default_value = "10")]
        at_secs: u64,
    },
    /// Renames the source table mid-ingest and recreates it; every batch key must reach
    /// the topic.
    Rotation {
        #[arg(long, default_value = "1")]
        at_secs: u64,
    },
}

impl ScenarioCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ScenarioCommand::Basic => "basic",
            ScenarioCommand::BrokerStop { .. } => "broker-stop",
            ScenarioCommand::BrokerKill { .. } => "broker-kill",
            ScenarioCommand::VmStop { .. } => "vm-stop",
            ScenarioCommand::ConnectorRestart { .. } => "connector-restart",
            ScenarioCommand::Rotation { .. } => "rotation",
        }
    }
}

/// Command-line overrides of the configured workload and convergence settings.
#[derive(Debug, Clone, Default, Args)]
pub(crate) struct Overrides {
    #[arg(long, global = true)]
    pub insert_workers: Option<u32>,
    #[arg(long, global = true)]
    pub select_workers: Option<u32>,
    /// Rows each insert worker writes.
    #[arg(long, global = true)]
    pub rows: Option<u64>,
    /// Rows per insert batch.
    #[arg(long, global = true)]
    pub batch: Option<u64>,
    /// Seconds each count probe may take to converge.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,
    /// Expected object count under the sink prefix; checked when a sink is configured.
    #[arg(long, global = true)]
    pub sink_objects: Option<u64>,
}

impl Overrides {
    fn workload(&self, base: &WorkloadConfig) -> WorkloadConfig {
        WorkloadConfig {
            insert_workers: self.insert_workers.unwrap_or(base.insert_workers),
            select_workers: self.select_workers.unwrap_or(base.select_workers),
            rows_per_worker: self.rows.unwrap_or(base.rows_per_worker),
            batch_size: self.batch.unwrap_or(base.batch_size),
            stagger_ms: base.stagger_ms,
        }
    }

    fn convergence(&self, base: &ConvergenceConfig) -> ConvergenceConfig {
        ConvergenceConfig {
            timeout_ms: self
                .timeout_secs
                .map(|secs| secs.saturating_mul(1_000))
                .unwrap_or(base.timeout_ms),
            ..base.clone()
        }
    }
}

/// Declares the scenario selected on the command line against the loaded context.
pub(crate) fn build_scenario(
    command: &ScenarioCommand,
    context: &ScenarioContext,
    overrides: &Overrides,
) -> HarnessResult<Scenario> {
    let workload = overrides.workload(&context.workload);
    let convergence = overrides.convergence(&context.convergence);
    let topic = Resource::Topic(context.destination.topic.clone());

    let mut builder = Scenario::builder(command.name()).convergence(&convergence);

    let workers = match command {
        ScenarioCommand::Rotation { .. } => vec![
            WorkerSpec::insert(1, workload.rows_per_worker, workload.batch_size)
                .with_pid_mode(PidMode::BatchIndex),
        ],
        _ => Vec::new(),
    };
    builder = if workers.is_empty() {
        builder.workload(&workload)
    } else {
        builder.workers(workers.clone())
    };

    let timeline = timeline_for(command, context)?;
    let class = timeline.fault_class();
    let overlaps_workload = !timeline.is_empty();
    let expected = if workers.is_empty() {
        workload.expected_rows()
    } else {
        expected_rows(&workers)
    };

    builder = builder.probe(DeliveryPolicy::probe_for(
        topic.clone(),
        class,
        expected,
        overlaps_workload,
    ));

    if let (Some(sink), Some(objects)) = (&context.destination.sink, overrides.sink_objects) {
        builder = builder.probe(DeliveryPolicy::probe_for(
            Resource::ObjectPrefix {
                bucket: sink.bucket.clone(),
                prefix: sink.prefix.clone(),
            },
            class,
            objects,
            overlaps_workload,
        ));
    }

    if let Some(worker) = workers.first() {
        builder = builder.coverage(KeyCoverage::pids(topic, 0..worker.batch_count() as i64));
    }

    builder.timeline(timeline).build()
}

fn timeline_for(command: &ScenarioCommand, context: &ScenarioContext) -> HarnessResult<FaultTimeline> {
    let timeline = FaultTimeline::new();

    match command {
        ScenarioCommand::Basic => Ok(timeline),
        ScenarioCommand::BrokerStop { at_secs, down_secs } => timeline
            .stop_pipeline(secs(*at_secs), true)?
            .restart_pipeline(back_up_at(*at_secs, *down_secs)?),
        ScenarioCommand::BrokerKill { at_secs, down_secs } => timeline
            .then(FaultAction::kill(FaultTarget::Broker, secs(*at_secs)))?
            .then(FaultAction::start(
                FaultTarget::Broker,
                back_up_at(*at_secs, *down_secs)?,
            )),
        ScenarioCommand::VmStop {
            name,
            at_secs,
            down_secs,
        } => {
            let mut stop = FaultAction::stop(FaultTarget::Vm(name.clone()), secs(*at_secs));
            if !context.control.vm.clean_shutdown {
                stop = stop.forceful();
            }

            timeline.then(stop)?.then(FaultAction::start(
                FaultTarget::Vm(name.clone()),
                back_up_at(*at_secs, *down_secs)?,
            ))
        }
        ScenarioCommand::ConnectorRestart { at_secs } => timeline.then(FaultAction::restart(
            FaultTarget::Connector,
            secs(*at_secs),
        )),
        ScenarioCommand::Rotation { at_secs } => {
            timeline.then(FaultAction::rotate(&context.source.table, secs(*at_secs)))
        }
    }
}

fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Offset at which a stopped component is brought back.
fn back_up_at(at_secs: u64, down_secs: u64) -> HarnessResult<Duration> {
    match at_secs.checked_add(down_secs) {
        Some(total) => Ok(secs(total)),
        None => bail!(
            ErrorKind::InvalidScenario,
            "Fault offset and downtime overflow",
            format!("at {at_secs}s + down {down_secs}s")
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use harness::convergence::Comparison;
    use harness::fault::FaultClass;
    use harness::scenario::ScenarioRunner;
    use harness::test_utils::pipeline::MemoryPipeline;
    use serde_json::json;

    use super::*;

    fn context(sink: bool) -> ScenarioContext {
        let mut destination = json!({ "topic": "person" });
        if sink {
            destination["sink"] = json!({ "bucket": "cdc-sink", "prefix": "topics/person" });
        }

        serde_json::from_value(json!({
            "profile": "mysql",
            "source": {
                "host": "localhost",
                "port": 5432,
                "name": "inventory",
                "username": "harness",
                "password": null,
            },
            "control": {
                "ssh": { "user": "ops" },
                "broker": { "host": "broker-1", "service": "kafka", "port": 9092 },
                "connector": { "host": "connect-1", "service": "kafka-connect", "port": 8083 },
            },
            "destination": destination,
            "workload": {
                "insert_workers": 4,
                "select_workers": 2,
                "rows_per_worker": 10000,
                "batch_size": 100,
            },
        }))
        .unwrap()
    }

    #[test]
    fn basic_expects_every_inserted_row_exactly_once() {
        let scenario =
            build_scenario(&ScenarioCommand::Basic, &context(false), &Overrides::default()).unwrap();

        assert_eq!(scenario.name(), "basic");
        assert_eq!(scenario.workers().len(), 6);
        assert!(scenario.timeline().is_empty());
        assert_eq!(scenario.probes().len(), 1);
        assert_eq!(scenario.probes()[0].expected, 40_000);
        assert_eq!(scenario.probes()[0].comparison, Comparison::Equal);
    }

    #[test]
    fn overrides_replace_the_configured_workload() {
        let overrides = Overrides {
            insert_workers: Some(2),
            select_workers: Some(0),
            rows: Some(500),
            batch: Some(50),
            timeout_secs: Some(5),
            ..Default::default()
        };
        let scenario =
            build_scenario(&ScenarioCommand::Basic, &context(false), &overrides).unwrap();

        assert_eq!(scenario.workers().len(), 2);
        assert_eq!(scenario.expected_rows(), 1_000);
        assert_eq!(scenario.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn broker_kill_asserts_at_least_once() {
        let command = ScenarioCommand::BrokerKill {
            at_secs: 10,
            down_secs: 20,
        };
        let scenario = build_scenario(&command, &context(false), &Overrides::default()).unwrap();

        assert_eq!(scenario.fault_class(), FaultClass::ForcefulKill);
        assert_eq!(scenario.timeline().len(), 2);
        assert_eq!(scenario.probes()[0].comparison, Comparison::AtLeast);
    }

    #[test]
    fn broker_stop_overlapping_ingest_asserts_at_least_once() {
        let command = ScenarioCommand::BrokerStop {
            at_secs: 10,
            down_secs: 10,
        };
        let scenario = build_scenario(&command, &context(false), &Overrides::default()).unwrap();

        assert_eq!(scenario.fault_class(), FaultClass::GracefulStop);
        assert_eq!(scenario.timeline().len(), 4);
        assert_eq!(scenario.probes()[0].comparison, Comparison::AtLeast);
    }

    #[test]
    fn vm_stop_without_vm_section_is_a_clean_shutdown() {
        let command = ScenarioCommand::VmStop {
            name: "kafka-vm".into(),
            at_secs: 10,
            down_secs: 60,
        };
        let scenario = build_scenario(&command, &context(false), &Overrides::default()).unwrap();

        assert_eq!(
            scenario.fault_class(),
            FaultClass::VmStop {
                clean_shutdown: true
            }
        );
        assert_eq!(scenario.probes()[0].comparison, Comparison::Equal);
    }

    #[test]
    fn overflowing_downtime_is_rejected() {
        let command = ScenarioCommand::BrokerKill {
            at_secs: u64::MAX,
            down_secs: 1,
        };
        let err = build_scenario(&command, &context(false), &Overrides::default()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidScenario);
    }

    #[test]
    fn sink_probe_is_added_only_with_an_expected_object_count() {
        let overrides = Overrides {
            sink_objects: Some(40),
            ..Default::default()
        };
        let scenario =
            build_scenario(&ScenarioCommand::Basic, &context(true), &overrides).unwrap();
        assert_eq!(scenario.probes().len(), 2);
        assert_eq!(scenario.probes()[1].expected, 40);

        let scenario =
            build_scenario(&ScenarioCommand::Basic, &context(true), &Overrides::default())
                .unwrap();
        assert_eq!(scenario.probes().len(), 1);
    }

    #[test]
    fn rotation_checks_every_batch_key() {
        let overrides = Overrides {
            rows: Some(6_500),
            ..Default::default()
        };
        let command = ScenarioCommand::Rotation { at_secs: 1 };
        let scenario = build_scenario(&command, &context(false), &overrides).unwrap();

        assert_eq!(scenario.workers().len(), 1);
        assert_eq!(scenario.workers()[0].pid_mode, PidMode::BatchIndex);
        assert_eq!(scenario.coverage().len(), 1);
        assert_eq!(scenario.coverage()[0].expected, 0..65);
        assert_eq!(scenario.fault_class(), FaultClass::None);
    }

    #[tokio::test(start_paused = true)]
    async fn basic_scenario_passes_against_a_healthy_pipeline() {
        let pipeline = MemoryPipeline::new();
        let overrides = Overrides {
            insert_workers: Some(2),
            select_workers: Some(1),
            rows: Some(1_000),
            batch: Some(100),
            ..Default::default()
        };
        let scenario =
            build_scenario(&ScenarioCommand::Basic, &context(false), &overrides).unwrap();

        let outcome = ScenarioRunner::new(pipeline.clone(), Arc::new(pipeline.clone()))
            .run(scenario)
            .await;

        assert!(outcome.passed(), "{:?}", outcome.verdict);
        assert_eq!(outcome.probes[0].final_count, 2_000);
    }
}
