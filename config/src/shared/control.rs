use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;
use crate::shared::base::require_non_empty;

/// Settings for the remote cluster control channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControlConfig {
    pub ssh: SshConfig,
    /// Message broker node.
    pub broker: ComponentEndpoint,
    /// Connector framework node.
    pub connector: ComponentEndpoint,
    #[serde(default)]
    pub vm: VmCommands,
    /// Run on the broker host; prints `topic:partition:offset` lines. `{topic}` is substituted.
    #[serde(default = "default_topic_offsets_command")]
    pub topic_offsets_command: String,
    /// Run on the broker host; prints one JSON record per line. `{topic}` is substituted.
    #[serde(default = "default_topic_read_command")]
    pub topic_read_command: String,
    /// Run locally; prints a single object count. `{bucket}` and `{prefix}` are substituted.
    #[serde(default)]
    pub object_count_command: Option<String>,
}

impl ControlConfig {
    pub const DEFAULT_TOPIC_OFFSETS_COMMAND: &'static str =
        "kafka-run-class.sh kafka.tools.GetOffsetShell --broker-list localhost:9092 --topic {topic} --time -1";

    pub const DEFAULT_TOPIC_READ_COMMAND: &'static str =
        "kafka-console-consumer.sh --bootstrap-server localhost:9092 --topic {topic} --from-beginning --timeout-ms 3000";

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.ssh.validate()?;
        self.broker.validate("control.broker")?;
        self.connector.validate("control.connector")?;
        self.vm.validate()?;

        require_placeholder(
            "control.topic_offsets_command",
            &self.topic_offsets_command,
            "{topic}",
        )?;
        require_placeholder(
            "control.topic_read_command",
            &self.topic_read_command,
            "{topic}",
        )?;

        if let Some(command) = &self.object_count_command {
            require_placeholder("control.object_count_command", command, "{bucket}")?;
            require_placeholder("control.object_count_command", command, "{prefix}")?;
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SshConfig {
    pub user: String,
    /// Private key passed with `-i`; the agent or default identity is used when absent.
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl SshConfig {
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("control.ssh.user", &self.user)?;

        if self.connect_timeout_secs == 0 {
            return Err(ValidationError::invalid(
                "control.ssh.connect_timeout_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// A process on a remote node, managed as a systemd unit and listening on `port`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ComponentEndpoint {
    pub host: String,
    /// systemd unit name.
    pub service: String,
    /// Listening port, used to find the process for a forceful kill.
    pub port: u16,
}

impl ComponentEndpoint {
    fn validate(&self, prefix: &str) -> Result<(), ValidationError> {
        require_non_empty(&format!("{prefix}.host"), &self.host)?;
        require_non_empty(&format!("{prefix}.service"), &self.service)?;

        if self.port == 0 {
            return Err(ValidationError::invalid(
                &format!("{prefix}.port"),
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Local commands driving the cloud provider's VM lifecycle. `{name}` is substituted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VmCommands {
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    /// Whether the provider drains guest processes before powering off.
    #[serde(default = "default_clean_shutdown")]
    pub clean_shutdown: bool,
}

impl Default for VmCommands {
    fn default() -> Self {
        Self {
            stop: None,
            start: None,
            clean_shutdown: default_clean_shutdown(),
        }
    }
}

impl VmCommands {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(stop) = &self.stop {
            require_placeholder("control.vm.stop", stop, "{name}")?;
        }
        if let Some(start) = &self.start {
            require_placeholder("control.vm.start", start, "{name}")?;
        }

        Ok(())
    }
}

fn require_placeholder(field: &str, template: &str, placeholder: &str) -> Result<(), ValidationError> {
    if !template.contains(placeholder) {
        return Err(ValidationError::MissingPlaceholder {
            field: field.to_string(),
            placeholder: placeholder.to_string(),
        });
    }

    Ok(())
}

fn default_topic_offsets_command() -> String {
    ControlConfig::DEFAULT_TOPIC_OFFSETS_COMMAND.to_string()
}

fn default_topic_read_command() -> String {
    ControlConfig::DEFAULT_TOPIC_READ_COMMAND.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    SshConfig::DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_clean_shutdown() -> bool {
    true
}
