use serde::Deserialize;

use crate::Config;
use crate::shared::base::require_non_empty;
use crate::shared::{
    ControlConfig, ConvergenceConfig, SourceConfig, ValidationError, WorkloadConfig,
};

/// Everything a scenario run needs to reach the pipeline under test.
///
/// Built once per process and passed by reference to the workload, fault and
/// convergence components.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioContext {
    /// Source profile label, e.g. `mysql`, `mssql` or `nodb`.
    pub profile: String,
    pub source: SourceConfig,
    pub control: ControlConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
}

impl ScenarioContext {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("profile", &self.profile)?;
        self.source.validate()?;
        self.control.validate()?;
        self.destination.validate()?;
        self.convergence.validate()?;
        self.workload.validate()
    }
}

impl Config for ScenarioContext {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// Where the pipeline delivers the rows the workload produces.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DestinationConfig {
    /// Topic the source connector produces into.
    pub topic: String,
    /// Object-store location written by the sink connector, when one is deployed.
    #[serde(default)]
    pub sink: Option<ObjectSinkConfig>,
}

impl DestinationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("destination.topic", &self.topic)?;

        if let Some(sink) = &self.sink {
            require_non_empty("destination.sink.bucket", &sink.bucket)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ObjectSinkConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_json() -> serde_json::Value {
        serde_json::json!({
            "profile": "mysql",
            "source": {
                "host": "10.0.0.4",
                "port": 5432,
                "name": "test",
                "username": "harness",
            },
            "control": {
                "ssh": { "user": "ubuntu" },
                "broker": { "host": "10.0.0.5", "service": "kafka", "port": 9092 },
                "connector": { "host": "10.0.0.6", "service": "kafka-connect", "port": 8083 },
            },
            "destination": { "topic": "mysql_person" },
        })
    }

    #[test]
    fn sections_without_values_use_defaults() {
        let context: ScenarioContext = serde_json::from_value(context_json()).unwrap();
        assert_eq!(context.workload.insert_workers, 4);
        assert_eq!(context.convergence.poll_interval_ms, 1_000);
        assert!(context.destination.sink.is_none());
        assert!(context.validate().is_ok());
    }

    #[test]
    fn empty_profile_is_rejected() {
        let mut json = context_json();
        json["profile"] = serde_json::json!("");
        let context: ScenarioContext = serde_json::from_value(json).unwrap();
        assert_eq!(
            context.validate(),
            Err(ValidationError::EmptyField("profile".to_string()))
        );
    }

    #[test]
    fn nested_section_errors_surface() {
        let mut json = context_json();
        json["workload"] = serde_json::json!({ "insert_workers": 0 });
        let context: ScenarioContext = serde_json::from_value(json).unwrap();
        assert!(matches!(
            context.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "workload.insert_workers"
        ));
    }
}
