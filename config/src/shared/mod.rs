//! Typed settings shared by the harness library and the runner binary.

mod base;
mod context;
mod control;
mod convergence;
mod source;
mod workload;

pub use base::ValidationError;
pub use context::{DestinationConfig, ObjectSinkConfig, ScenarioContext};
pub use control::{ComponentEndpoint, ControlConfig, SshConfig, VmCommands};
pub use convergence::ConvergenceConfig;
pub use source::{SourceConfig, SourceConfigWithoutSecrets};
pub use workload::WorkloadConfig;
