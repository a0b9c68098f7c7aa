use config::load_config;
use config::shared::ScenarioContext;

use crate::error::{RunnerError, RunnerResult};

/// Loads and validates the scenario context.
///
/// Uses the layered loading of [`config::load_config`] and validates the resulting
/// [`ScenarioContext`] before any scenario is built from it.
pub fn load_scenario_context() -> RunnerResult<ScenarioContext> {
    let context = load_config::<ScenarioContext>().map_err(RunnerError::config)?;
    context.validate().map_err(RunnerError::config)?;

    Ok(context)
}
