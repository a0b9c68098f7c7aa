//! Interface to the infrastructure of the pipeline under test.
//!
//! [`ClusterControl`] starts, stops and kills pipeline components and reads destination
//! counts. [`KeyReader`] reads back individual key values for coverage checks. The harness
//! core depends only on these traits; [`ssh::SshClusterControl`] drives a real deployment and
//! the in-memory pipeline in `test_utils` serves tests.

pub mod ssh;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::HarnessResult;

/// Infrastructure component a fault action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultTarget {
    Broker,
    Connector,
    /// A virtual machine, by provider instance name.
    Vm(String),
    /// A source table, by name.
    Table(String),
}

impl fmt::Display for FaultTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultTarget::Broker => f.write_str("broker"),
            FaultTarget::Connector => f.write_str("connector"),
            FaultTarget::Vm(name) => write!(f, "vm:{name}"),
            FaultTarget::Table(name) => write!(f, "table:{name}"),
        }
    }
}

impl Serialize for FaultTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What a control call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    Applied,
    /// The target was already in the requested state; nothing was done.
    AlreadyInState,
}

/// A destination resource whose size can be probed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Topic(String),
    Table(String),
    ObjectPrefix { bucket: String, prefix: String },
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Topic(name) => write!(f, "topic:{name}"),
            Resource::Table(name) => write!(f, "table:{name}"),
            Resource::ObjectPrefix { bucket, prefix } => write!(f, "objects:{bucket}/{prefix}"),
        }
    }
}

/// Control channel to the pipeline's infrastructure.
///
/// Verbs return [`ControlOutcome::AlreadyInState`] instead of failing when the target is
/// already where the verb would put it. Any error means the control path itself is broken.
pub trait ClusterControl: Send + Sync + 'static {
    /// Stops the target; `graceful` lets it drain and commit in-flight work first.
    fn stop(
        &self,
        target: &FaultTarget,
        graceful: bool,
    ) -> impl Future<Output = HarnessResult<ControlOutcome>> + Send;

    /// Terminates the target immediately.
    fn kill(&self, target: &FaultTarget) -> impl Future<Output = HarnessResult<ControlOutcome>> + Send;

    fn start(&self, target: &FaultTarget) -> impl Future<Output = HarnessResult<ControlOutcome>> + Send;

    /// Graceful stop followed by start.
    fn restart(&self, target: &FaultTarget) -> impl Future<Output = HarnessResult<ControlOutcome>> + Send;

    /// Rotates a source table: the current table is archived and an empty one takes its name.
    fn rotate(&self, target: &FaultTarget) -> impl Future<Output = HarnessResult<ControlOutcome>> + Send;

    /// Counts the records currently in `resource`.
    ///
    /// Reflects at least everything committed before the call started. The raw reading is
    /// returned unvalidated; callers reject negative values.
    fn query_count(
        &self,
        resource: &Resource,
        timeout: Duration,
    ) -> impl Future<Output = HarnessResult<i64>> + Send;
}

/// Reads the values of one integer field across every record of a resource.
pub trait KeyReader: Send + Sync + 'static {
    fn read_keys(
        &self,
        resource: &Resource,
        field: &str,
    ) -> impl Future<Output = HarnessResult<Vec<i64>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_and_resources_render_compactly() {
        assert_eq!(FaultTarget::Vm("kafka-1".into()).to_string(), "vm:kafka-1");
        assert_eq!(FaultTarget::Broker.to_string(), "broker");
        assert_eq!(
            Resource::ObjectPrefix {
                bucket: "sink".into(),
                prefix: "topics/person".into()
            }
            .to_string(),
            "objects:sink/topics/person"
        );
    }

    #[test]
    fn targets_serialize_as_strings() {
        let json = serde_json::to_string(&FaultTarget::Table("person".into())).unwrap();
        assert_eq!(json, r#""table:person""#);
    }
}
