use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Default polling cadence and bounds for convergence waits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConvergenceConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound of a single probe wait.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound of the workload and fault phase of a scenario.
    #[serde(default = "default_scenario_timeout_ms")]
    pub scenario_timeout_ms: u64,
}

impl ConvergenceConfig {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    pub const DEFAULT_SCENARIO_TIMEOUT_MS: u64 = 600_000;

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_timeout_ms)
    }

    /// Ensures every bound is non-zero and the poll interval fits in the probe timeout.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::invalid(
                "convergence.poll_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.timeout_ms < self.poll_interval_ms {
            return Err(ValidationError::invalid(
                "convergence.timeout_ms",
                "must be >= poll_interval_ms",
            ));
        }

        if self.scenario_timeout_ms == 0 {
            return Err(ValidationError::invalid(
                "convergence.scenario_timeout_ms",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            scenario_timeout_ms: Self::DEFAULT_SCENARIO_TIMEOUT_MS,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    ConvergenceConfig::DEFAULT_POLL_INTERVAL_MS
}

fn default_timeout_ms() -> u64 {
    ConvergenceConfig::DEFAULT_TIMEOUT_MS
}

fn default_scenario_timeout_ms() -> u64 {
    ConvergenceConfig::DEFAULT_SCENARIO_TIMEOUT_MS
}
