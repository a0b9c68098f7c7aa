//! Scripted infrastructure failures.

mod injector;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub use injector::{ExecutedAction, ExecutedTimeline, FaultInjector};

use crate::bail;
use crate::control::FaultTarget;
use crate::error::{ErrorKind, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultVerb {
    Stop,
    Kill,
    Start,
    Restart,
    Rotate,
}

impl fmt::Display for FaultVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            FaultVerb::Stop => "stop",
            FaultVerb::Kill => "kill",
            FaultVerb::Start => "start",
            FaultVerb::Restart => "restart",
            FaultVerb::Rotate => "rotate",
        };
        f.write_str(verb)
    }
}

/// One scheduled failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultAction {
    pub target: FaultTarget,
    pub verb: FaultVerb,
    /// Offset from scenario start at which the action fires.
    #[serde(rename = "delay_ms", serialize_with = "serialize_millis")]
    pub delay: Duration,
    /// Cooperative shutdown for `Stop`; for a VM stop, whether the provider shuts the guest
    /// down cleanly.
    pub graceful: bool,
}

impl FaultAction {
    pub fn stop(target: FaultTarget, delay: Duration) -> Self {
        Self::new(target, FaultVerb::Stop, delay, true)
    }

    pub fn kill(target: FaultTarget, delay: Duration) -> Self {
        Self::new(target, FaultVerb::Kill, delay, false)
    }

    pub fn start(target: FaultTarget, delay: Duration) -> Self {
        Self::new(target, FaultVerb::Start, delay, true)
    }

    pub fn restart(target: FaultTarget, delay: Duration) -> Self {
        Self::new(target, FaultVerb::Restart, delay, true)
    }

    pub fn rotate(table: impl Into<String>, delay: Duration) -> Self {
        Self::new(FaultTarget::Table(table.into()), FaultVerb::Rotate, delay, true)
    }

    /// Turns a stop into an immediate termination.
    pub fn forceful(mut self) -> Self {
        self.graceful = false;
        self
    }

    fn new(target: FaultTarget, verb: FaultVerb, delay: Duration, graceful: bool) -> Self {
        Self {
            target,
            verb,
            delay,
            graceful,
        }
    }

    /// Whether the action interrupts delivery, as opposed to bringing something back.
    pub fn is_disruptive(&self) -> bool {
        matches!(
            self.verb,
            FaultVerb::Stop | FaultVerb::Kill | FaultVerb::Restart
        )
    }

    fn validate(&self) -> HarnessResult<()> {
        match (&self.target, self.verb) {
            (FaultTarget::Table(_), FaultVerb::Rotate) => Ok(()),
            (FaultTarget::Table(_), verb) => bail!(
                ErrorKind::InvalidScenario,
                "Tables can only be rotated",
                format!("{verb} {}", self.target)
            ),
            (target, FaultVerb::Rotate) => bail!(
                ErrorKind::InvalidScenario,
                "Only tables can be rotated",
                target
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for FaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {:?}", self.verb, self.target, self.delay)?;
        if self.verb == FaultVerb::Stop && !self.graceful {
            f.write_str(" (forceful)")?;
        }
        Ok(())
    }
}

/// How producers reach the broker, which decides what a broker failure can do to counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerPath {
    /// Rows go to the source database and the connector produces them.
    #[default]
    Source,
    /// Workers produce straight to the broker; records sent while it is down are lost.
    Broker,
}

/// Delivery-relevant classification of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "class")]
pub enum FaultClass {
    None,
    GracefulStop,
    ForcefulKill,
    VmStop { clean_shutdown: bool },
    /// The broker was taken down under producers writing to it directly.
    ProducerSideKill,
}

impl FaultClass {
    /// Whether the class can leave uncommitted offsets to be reprocessed.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            FaultClass::None | FaultClass::GracefulStop | FaultClass::VmStop { clean_shutdown: true }
        )
    }
}

/// Ordered fault actions, applied strictly in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultTimeline {
    actions: Vec<FaultAction>,
}

impl FaultTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a timeline, rejecting invalid actions and decreasing offsets.
    pub fn from_actions(actions: Vec<FaultAction>) -> HarnessResult<Self> {
        let mut timeline = Self::new();
        for action in actions {
            timeline.push(action)?;
        }
        Ok(timeline)
    }

    /// Appends an action; its delay may not precede the previous action's.
    pub fn push(&mut self, action: FaultAction) -> HarnessResult<()> {
        action.validate()?;

        if let Some(last) = self.actions.last() {
            if action.delay < last.delay {
                bail!(
                    ErrorKind::InvalidScenario,
                    "Fault actions must be declared in schedule order",
                    format!("{action} is scheduled before {last}")
                );
            }
        }

        self.actions.push(action);
        Ok(())
    }

    /// Appends an action, builder style.
    pub fn then(mut self, action: FaultAction) -> HarnessResult<Self> {
        self.push(action)?;
        Ok(self)
    }

    /// Stops the connector, then the broker, so the connector can flush first.
    pub fn stop_pipeline(mut self, at: Duration, graceful: bool) -> HarnessResult<Self> {
        let (connector, broker) = if graceful {
            (
                FaultAction::stop(FaultTarget::Connector, at),
                FaultAction::stop(FaultTarget::Broker, at),
            )
        } else {
            (
                FaultAction::kill(FaultTarget::Connector, at),
                FaultAction::kill(FaultTarget::Broker, at),
            )
        };

        self.push(connector)?;
        self.push(broker)?;
        Ok(self)
    }

    /// Starts the broker, then the connector that depends on it.
    pub fn restart_pipeline(mut self, at: Duration) -> HarnessResult<Self> {
        self.push(FaultAction::start(FaultTarget::Broker, at))?;
        self.push(FaultAction::start(FaultTarget::Connector, at))?;
        Ok(self)
    }

    pub fn actions(&self) -> &[FaultAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Offset of the first disruptive action.
    pub fn first_disruption(&self) -> Option<Duration> {
        self.actions
            .iter()
            .find(|action| action.is_disruptive())
            .map(|action| action.delay)
    }

    /// Classifies the timeline for producers writing through the source.
    pub fn fault_class(&self) -> FaultClass {
        self.fault_class_for(ProducerPath::Source)
    }

    /// Classifies the timeline; the most severe action wins.
    pub fn fault_class_for(&self, path: ProducerPath) -> FaultClass {
        let mut class = FaultClass::None;

        for action in &self.actions {
            let forceful = action.verb == FaultVerb::Kill
                || (action.verb == FaultVerb::Stop && !action.graceful);

            let action_class = match (&action.target, action.verb) {
                (FaultTarget::Table(_), _) | (_, FaultVerb::Start) => continue,
                (FaultTarget::Broker, _) if path == ProducerPath::Broker => {
                    FaultClass::ProducerSideKill
                }
                (FaultTarget::Vm(_), _) => FaultClass::VmStop {
                    clean_shutdown: !forceful,
                },
                _ if forceful => FaultClass::ForcefulKill,
                _ => FaultClass::GracefulStop,
            };

            if severity(action_class) > severity(class) {
                class = action_class;
            }
        }

        class
    }
}

fn severity(class: FaultClass) -> u8 {
    match class {
        FaultClass::None => 0,
        FaultClass::GracefulStop => 1,
        FaultClass::VmStop {
            clean_shutdown: true,
        } => 2,
        FaultClass::VmStop {
            clean_shutdown: false,
        } => 3,
        FaultClass::ForcefulKill => 4,
        FaultClass::ProducerSideKill => 5,
    }
}

pub(crate) fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
