use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::control::{ClusterControl, ControlOutcome};
use crate::error::{ErrorKind, HarnessResult};
use crate::failpoints::{FAULT_BEFORE_ACTION, harness_fail_point};
use crate::fault::{FaultAction, FaultTimeline, FaultVerb, serialize_millis};
use crate::harness_error;

/// A fault action as it actually happened.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedAction {
    pub action: FaultAction,
    /// Offset from scenario start at which the action was sent.
    #[serde(rename = "sent_at_ms", serialize_with = "serialize_millis")]
    pub sent_at: Duration,
    /// Offset from scenario start at which the control call returned.
    #[serde(rename = "completed_at_ms", serialize_with = "serialize_millis")]
    pub completed_at: Duration,
    pub completed_wall: DateTime<Utc>,
    pub outcome: ControlOutcome,
}

/// Actions executed so far, plus the ones abandoned after a control failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutedTimeline {
    pub executed: Vec<ExecutedAction>,
    pub abandoned: Vec<FaultAction>,
}

impl ExecutedTimeline {
    pub fn is_complete(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// Applies a [`FaultTimeline`] through a [`ClusterControl`].
#[derive(Debug)]
pub struct FaultInjector<K, C = TokioClock> {
    control: Arc<K>,
    clock: C,
}

impl<K> FaultInjector<K, TokioClock>
where
    K: ClusterControl,
{
    pub fn new(control: Arc<K>) -> Self {
        Self::with_clock(control, TokioClock::new())
    }
}

impl<K, C> FaultInjector<K, C>
where
    K: ClusterControl,
    C: Clock,
{
    pub fn with_clock(control: Arc<K>, clock: C) -> Self {
        Self { control, clock }
    }

    /// Runs the timeline and returns what was executed.
    ///
    /// Stops at the first control failure, which is returned as a
    /// [`ErrorKind::FaultControlError`].
    pub async fn run(
        &self,
        timeline: &FaultTimeline,
        scenario_start: Instant,
    ) -> HarnessResult<ExecutedTimeline> {
        let mut executed = ExecutedTimeline::default();
        self.run_into(timeline, scenario_start, &mut executed).await?;

        Ok(executed)
    }

    /// Like [`Self::run`], but records into `executed` so the partial timeline survives a
    /// failure or a dropped future.
    pub async fn run_into(
        &self,
        timeline: &FaultTimeline,
        scenario_start: Instant,
        executed: &mut ExecutedTimeline,
    ) -> HarnessResult<()> {
        let actions = timeline.actions();

        for (index, action) in actions.iter().enumerate() {
            self.clock.sleep_until(scenario_start + action.delay).await;

            let sent_at = self.clock.now().saturating_duration_since(scenario_start);
            info!(
                fault_target = %action.target,
                verb = %action.verb,
                graceful = action.graceful,
                delay_ms = action.delay.as_millis() as u64,
                "applying fault action"
            );

            match self.apply(action).await {
                Ok(outcome) => {
                    if outcome == ControlOutcome::AlreadyInState {
                        warn!(
                            fault_target = %action.target,
                            verb = %action.verb,
                            "target already in requested state, action was a no-op"
                        );
                    }

                    executed.executed.push(ExecutedAction {
                        action: action.clone(),
                        sent_at,
                        completed_at: self.clock.now().saturating_duration_since(scenario_start),
                        completed_wall: self.clock.wall_now(),
                        outcome,
                    });
                }
                Err(err) => {
                    let remaining = &actions[index..];
                    error!(
                        fault_target = %action.target,
                        verb = %action.verb,
                        abandoned = remaining.len(),
                        error = %err,
                        "fault action failed, abandoning timeline"
                    );
                    executed.abandoned.extend(remaining.iter().cloned());

                    if err.kind() == ErrorKind::FaultControlError {
                        return Err(err);
                    }

                    return Err(harness_error!(
                        ErrorKind::FaultControlError,
                        "Fault action could not be executed",
                        action,
                        source: err
                    ));
                }
            }
        }

        Ok(())
    }

    async fn apply(&self, action: &FaultAction) -> HarnessResult<ControlOutcome> {
        harness_fail_point(FAULT_BEFORE_ACTION)?;

        match action.verb {
            FaultVerb::Stop => self.control.stop(&action.target, action.graceful).await,
            FaultVerb::Kill => self.control.kill(&action.target).await,
            FaultVerb::Start => self.control.start(&action.target).await,
            FaultVerb::Restart => self.control.restart(&action.target).await,
            FaultVerb::Rotate => self.control.rotate(&action.target).await,
        }
    }
}
