//! Configuration for the fault-injection harness.
//!
//! Settings are loaded hierarchically by [`load_config`] and grouped under
//! [`shared::ScenarioContext`], which is built once per run and handed to every
//! harness component.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
