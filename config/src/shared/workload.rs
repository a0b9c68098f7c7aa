use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Default workload shape used when a scenario does not size itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkloadConfig {
    #[serde(default = "default_insert_workers")]
    pub insert_workers: u32,
    #[serde(default)]
    pub select_workers: u32,
    /// Rows written by each insert worker.
    #[serde(default = "default_rows_per_worker")]
    pub rows_per_worker: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Delay between consecutive worker starts, in milliseconds.
    #[serde(default)]
    pub stagger_ms: u64,
}

impl WorkloadConfig {
    pub const DEFAULT_INSERT_WORKERS: u32 = 4;

    pub const DEFAULT_ROWS_PER_WORKER: u64 = 10_000;

    pub const DEFAULT_BATCH_SIZE: u64 = 100;

    /// Rows the insert workers produce in total.
    pub fn expected_rows(&self) -> u64 {
        u64::from(self.insert_workers) * self.rows_per_worker
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.insert_workers == 0 {
            return Err(ValidationError::invalid(
                "workload.insert_workers",
                "must be greater than 0",
            ));
        }

        if self.batch_size == 0 {
            return Err(ValidationError::invalid(
                "workload.batch_size",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            insert_workers: Self::DEFAULT_INSERT_WORKERS,
            select_workers: 0,
            rows_per_worker: Self::DEFAULT_ROWS_PER_WORKER,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            stagger_ms: 0,
        }
    }
}

fn default_insert_workers() -> u32 {
    WorkloadConfig::DEFAULT_INSERT_WORKERS
}

fn default_rows_per_worker() -> u64 {
    WorkloadConfig::DEFAULT_ROWS_PER_WORKER
}

fn default_batch_size() -> u64 {
    WorkloadConfig::DEFAULT_BATCH_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_workload_produces_forty_thousand_rows() {
        let workload = WorkloadConfig::default();
        assert_eq!(workload.expected_rows(), 40_000);
        assert!(workload.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let workload = WorkloadConfig {
            batch_size: 0,
            ..WorkloadConfig::default()
        };
        assert_eq!(
            workload.validate(),
            Err(ValidationError::invalid(
                "workload.batch_size",
                "must be greater than 0"
            ))
        );
    }
}
