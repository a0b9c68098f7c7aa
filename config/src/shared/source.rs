use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::shared::ValidationError;
use crate::shared::base::require_non_empty;

/// Application name reported by every workload connection.
const APP_NAME_WORKLOAD: &str = "cdc_harness_workload";

/// Postgres database the insert and select workers run against.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    /// Database name.
    pub name: String,
    pub username: String,
    /// Redacted in debug output.
    pub password: Option<SecretString>,
    /// Table the workload writes into and the rotation renames.
    #[serde(default = "default_table")]
    pub table: String,
    /// Requires a verified TLS session when true; TLS is preferred otherwise.
    #[serde(default)]
    pub require_tls: bool,
}

impl SourceConfig {
    pub const DEFAULT_TABLE: &'static str = "person";

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("source.host", &self.host)?;
        require_non_empty("source.name", &self.name)?;
        require_non_empty("source.username", &self.username)?;
        require_non_empty("source.table", &self.table)?;

        if self.port == 0 {
            return Err(ValidationError::invalid("source.port", "must be greater than 0"));
        }

        Ok(())
    }

    /// Connection options for one workload connection.
    pub fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_tls {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };

        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.name)
            .ssl_mode(ssl_mode)
            .application_name(APP_NAME_WORKLOAD);

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }
}

/// [`SourceConfig`] without credentials, safe to embed in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfigWithoutSecrets {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub table: String,
}

impl From<&SourceConfig> for SourceConfigWithoutSecrets {
    fn from(value: &SourceConfig) -> Self {
        SourceConfigWithoutSecrets {
            host: value.host.clone(),
            port: value.port,
            name: value.name.clone(),
            username: value.username.clone(),
            table: value.table.clone(),
        }
    }
}

fn default_table() -> String {
    SourceConfig::DEFAULT_TABLE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceConfig {
        serde_json::from_value(serde_json::json!({
            "host": "10.0.0.4",
            "port": 5432,
            "name": "inventory",
            "username": "harness",
            "password": "hunter2",
        }))
        .unwrap()
    }

    #[test]
    fn table_defaults_to_person() {
        let source = source();
        assert_eq!(source.table, "person");
        assert!(!source.require_tls);
        assert!(source.validate().is_ok());
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let rendered = format!("{:?}", source());
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut source = source();
        source.port = 0;
        assert_eq!(
            source.validate(),
            Err(ValidationError::invalid("source.port", "must be greater than 0"))
        );
    }

    #[test]
    fn secrets_are_dropped_from_report_form() {
        let without: SourceConfigWithoutSecrets = (&source()).into();
        let rendered = serde_json::to_string(&without).unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("inventory"));
    }
}
