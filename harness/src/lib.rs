//! Fault-injection and convergence-verification harness for CDC pipelines.
//!
//! A [`scenario::Scenario`] declares a concurrent insert/select workload, a timeline of
//! infrastructure faults and the count assertions a correct pipeline must satisfy
//! afterwards. [`scenario::ScenarioRunner`] drives the workload through a
//! [`workload::RowSourceFactory`] while the [`fault::FaultInjector`] applies the timeline
//! through a [`control::ClusterControl`], then polls each destination with the
//! [`convergence::ConvergenceChecker`] and returns a verdict with full diagnostics.

pub mod clock;
pub mod compaction;
pub mod control;
pub mod convergence;
pub mod error;
pub mod failpoints;
pub mod fault;
mod macros;
pub mod scenario;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod workload;
