//! Remote [`ClusterControl`] backend.
//!
//! Broker and connector are systemd units driven over `ssh`. VM lifecycle commands run
//! locally through the configured provider CLI templates. Table counts and rotations go
//! straight to the source database.

use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use config::shared::{ComponentEndpoint, ControlConfig, SourceConfig};
use pg_escape::quote_identifier;
use sqlx::{Connection, PgConnection};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::bail;
use crate::control::{ClusterControl, ControlOutcome, FaultTarget, KeyReader, Resource};
use crate::error::{ErrorKind, HarnessResult};
use crate::harness_error;

/// Upper bound for lifecycle commands (systemctl, fuser, provider CLI).
const COMMAND_TIMEOUT: Duration = Duration::from_secs(180);

/// Exit status `ssh` reports when it could not reach or authenticate to the host.
const SSH_CONNECTION_FAILED: i32 = 255;

/// Exit status of `systemctl is-active` for an inactive unit.
const SYSTEMD_INACTIVE: i32 = 3;

/// Exit status of `fuser -k` when no process matched.
const FUSER_NO_MATCH: i32 = 1;

#[derive(Debug)]
struct CommandOutput {
    status: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct SshClusterControl {
    control: ControlConfig,
    source: SourceConfig,
}

impl SshClusterControl {
    pub fn new(control: ControlConfig, source: SourceConfig) -> Self {
        Self { control, source }
    }

    fn endpoint(&self, target: &FaultTarget) -> HarnessResult<&ComponentEndpoint> {
        match target {
            FaultTarget::Broker => Ok(&self.control.broker),
            FaultTarget::Connector => Ok(&self.control.connector),
            other => bail!(
                ErrorKind::InvalidScenario,
                "Target is not a managed service",
                other
            ),
        }
    }

    async fn ssh(&self, host: &str, remote_command: &str, timeout: Duration) -> HarnessResult<CommandOutput> {
        let ssh = &self.control.ssh;
        let mut command = Command::new("ssh");
        command
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", ssh.connect_timeout_secs))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");
        if let Some(key_path) = &ssh.key_path {
            command.arg("-i").arg(key_path);
        }
        command.arg(format!("{}@{host}", ssh.user)).arg(remote_command);

        let output = run(command, timeout).await?;
        if output.status == Some(SSH_CONNECTION_FAILED) {
            bail!(
                ErrorKind::ConnectionError,
                "SSH connection failed",
                format!("{host}: {}", output.stderr.trim())
            );
        }

        debug!(host, command = remote_command, status = ?output.status, "remote command finished");
        Ok(output)
    }

    async fn local(&self, shell_command: &str, timeout: Duration) -> HarnessResult<CommandOutput> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(shell_command);

        let output = run(command, timeout).await?;
        debug!(command = shell_command, status = ?output.status, "local command finished");
        Ok(output)
    }

    async fn is_active(&self, endpoint: &ComponentEndpoint) -> HarnessResult<bool> {
        let output = self
            .ssh(
                &endpoint.host,
                &format!("systemctl is-active --quiet {}", endpoint.service),
                COMMAND_TIMEOUT,
            )
            .await?;

        match output.status {
            Some(0) => Ok(true),
            Some(SYSTEMD_INACTIVE) => Ok(false),
            _ => bail!(
                ErrorKind::FaultControlError,
                "Could not determine service state",
                format!("{}: {}", endpoint.service, output.stderr.trim())
            ),
        }
    }

    async fn systemctl(&self, endpoint: &ComponentEndpoint, verb: &str) -> HarnessResult<ControlOutcome> {
        let output = self
            .ssh(
                &endpoint.host,
                &format!("sudo systemctl {verb} {}", endpoint.service),
                COMMAND_TIMEOUT,
            )
            .await?;

        if !output.success() {
            bail!(
                ErrorKind::FaultControlError,
                "Service command failed",
                format!("systemctl {verb} {}: {}", endpoint.service, output.stderr.trim())
            );
        }

        info!(host = %endpoint.host, service = %endpoint.service, verb, "service command applied");
        Ok(ControlOutcome::Applied)
    }

    async fn vm_command(&self, name: &str, template: Option<&String>, verb: &str) -> HarnessResult<ControlOutcome> {
        let Some(template) = template else {
            bail!(
                ErrorKind::ConfigError,
                "No VM command configured",
                format!("control.vm.{verb} is not set")
            );
        };

        let command = render(template, &[("{name}", name)]);
        let output = self.local(&command, COMMAND_TIMEOUT).await?;
        if !output.success() {
            bail!(
                ErrorKind::FaultControlError,
                "VM command failed",
                format!("{verb} {name}: {}", output.stderr.trim())
            );
        }

        info!(vm = name, verb, "vm command applied");
        Ok(ControlOutcome::Applied)
    }

    async fn connect_source(&self) -> HarnessResult<PgConnection> {
        Ok(PgConnection::connect_with(&self.source.connect_options()).await?)
    }

    async fn count_table(&self, table: &str) -> HarnessResult<i64> {
        let mut connection = self.connect_source().await?;
        let count: i64 = sqlx::query_scalar(&format!(
            "select count(*) from {}",
            quote_identifier(table)
        ))
        .fetch_one(&mut connection)
        .await?;
        connection.close().await?;

        Ok(count)
    }

    async fn count_topic(&self, topic: &str, timeout: Duration) -> HarnessResult<i64> {
        let command = render(&self.control.topic_offsets_command, &[("{topic}", topic)]);
        let output = self.ssh(&self.control.broker.host, &command, timeout).await?;

        if !output.success() {
            // The broker refusing connections is expected while it is down.
            bail!(
                ErrorKind::ConnectionError,
                "Topic offsets could not be read",
                output.stderr.trim().to_string()
            );
        }

        sum_end_offsets(&output.stdout)
    }

    async fn count_objects(&self, bucket: &str, prefix: &str, timeout: Duration) -> HarnessResult<i64> {
        let Some(template) = &self.control.object_count_command else {
            bail!(
                ErrorKind::ConfigError,
                "No object count command configured",
                "control.object_count_command is not set"
            );
        };

        let command = render(template, &[("{bucket}", bucket), ("{prefix}", prefix)]);
        let output = self.local(&command, timeout).await?;
        if !output.success() {
            bail!(
                ErrorKind::ConnectionError,
                "Object count command failed",
                output.stderr.trim().to_string()
            );
        }

        let trimmed = output.stdout.trim();
        trimmed.parse::<i64>().map_err(|err| {
            harness_error!(
                ErrorKind::ProbeError,
                "Object count is not an integer",
                format!("`{trimmed}`"),
                source: err
            )
        })
    }
}

impl ClusterControl for SshClusterControl {
    async fn stop(&self, target: &FaultTarget, graceful: bool) -> HarnessResult<ControlOutcome> {
        if !graceful {
            return self.kill(target).await;
        }

        if let FaultTarget::Vm(name) = target {
            return self.vm_command(name, self.control.vm.stop.as_ref(), "stop").await;
        }

        let endpoint = self.endpoint(target)?;
        if !self.is_active(endpoint).await? {
            return Ok(ControlOutcome::AlreadyInState);
        }

        self.systemctl(endpoint, "stop").await
    }

    async fn kill(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        if let FaultTarget::Vm(name) = target {
            return self.vm_command(name, self.control.vm.stop.as_ref(), "stop").await;
        }

        let endpoint = self.endpoint(target)?;
        let output = self
            .ssh(
                &endpoint.host,
                &format!("sudo fuser -k -KILL {}/tcp", endpoint.port),
                COMMAND_TIMEOUT,
            )
            .await?;

        match output.status {
            Some(0) => {
                info!(host = %endpoint.host, port = endpoint.port, "killed process");
                Ok(ControlOutcome::Applied)
            }
            Some(FUSER_NO_MATCH) => Ok(ControlOutcome::AlreadyInState),
            _ => bail!(
                ErrorKind::FaultControlError,
                "Kill command failed",
                format!("port {}: {}", endpoint.port, output.stderr.trim())
            ),
        }
    }

    async fn start(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        if let FaultTarget::Vm(name) = target {
            return self.vm_command(name, self.control.vm.start.as_ref(), "start").await;
        }

        let endpoint = self.endpoint(target)?;
        if self.is_active(endpoint).await? {
            return Ok(ControlOutcome::AlreadyInState);
        }

        self.systemctl(endpoint, "start").await
    }

    async fn restart(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        if let FaultTarget::Vm(name) = target {
            self.vm_command(name, self.control.vm.stop.as_ref(), "stop").await?;
            return self.vm_command(name, self.control.vm.start.as_ref(), "start").await;
        }

        let endpoint = self.endpoint(target)?;
        self.systemctl(endpoint, "restart").await
    }

    async fn rotate(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        let FaultTarget::Table(table) = target else {
            bail!(ErrorKind::InvalidScenario, "Only tables can be rotated", target);
        };

        let archived = rotated_table_name(table, &Utc::now());
        let mut connection = self.connect_source().await?;
        let mut transaction = connection.begin().await?;
        sqlx::query(&format!(
            "alter table {} rename to {}",
            quote_identifier(table),
            quote_identifier(&archived)
        ))
        .execute(&mut *transaction)
        .await?;
        sqlx::query(&format!(
            "create table {} (like {} including all)",
            quote_identifier(table),
            quote_identifier(&archived)
        ))
        .execute(&mut *transaction)
        .await?;
        transaction.commit().await?;
        connection.close().await?;

        info!(table, archived, "rotated table");
        Ok(ControlOutcome::Applied)
    }

    async fn query_count(&self, resource: &Resource, timeout: Duration) -> HarnessResult<i64> {
        match resource {
            Resource::Topic(topic) => self.count_topic(topic, timeout).await,
            Resource::Table(table) => {
                match tokio::time::timeout(timeout, self.count_table(table)).await {
                    Ok(count) => count,
                    Err(_) => bail!(
                        ErrorKind::ConnectionError,
                        "Table count timed out",
                        table
                    ),
                }
            }
            Resource::ObjectPrefix { bucket, prefix } => {
                self.count_objects(bucket, prefix, timeout).await
            }
        }
    }
}

impl KeyReader for SshClusterControl {
    async fn read_keys(&self, resource: &Resource, field: &str) -> HarnessResult<Vec<i64>> {
        match resource {
            Resource::Topic(topic) => {
                let command = render(&self.control.topic_read_command, &[("{topic}", topic)]);
                let output = self
                    .ssh(&self.control.broker.host, &command, COMMAND_TIMEOUT)
                    .await?;
                if !output.success() {
                    bail!(
                        ErrorKind::ConnectionError,
                        "Topic could not be read",
                        output.stderr.trim().to_string()
                    );
                }

                Ok(parse_json_keys(&output.stdout, field))
            }
            Resource::Table(table) => {
                let mut connection = self.connect_source().await?;
                let keys: Vec<i64> = sqlx::query_scalar(&format!(
                    "select {}::bigint from {}",
                    quote_identifier(field),
                    quote_identifier(table)
                ))
                .fetch_all(&mut connection)
                .await?;
                connection.close().await?;

                Ok(keys)
            }
            Resource::ObjectPrefix { .. } => bail!(
                ErrorKind::InvalidScenario,
                "Keys cannot be read from an object prefix",
                resource
            ),
        }
    }
}

async fn run(mut command: Command, timeout: Duration) -> HarnessResult<CommandOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(output) => output?,
        Err(_) => bail!(
            ErrorKind::ConnectionError,
            "Command timed out",
            format!("no exit after {timeout:?}")
        ),
    };

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Substitutes `{placeholder}` values into a command template.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |rendered, (placeholder, value)| {
            rendered.replace(placeholder, value)
        })
}

/// Sums the end offsets of `topic:partition:offset` lines.
fn sum_end_offsets(output: &str) -> HarnessResult<i64> {
    let mut total = 0i64;

    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some(offset) = line.rsplit(':').next() else {
            continue;
        };
        match offset.parse::<i64>() {
            Ok(offset) => total += offset,
            Err(err) => bail!(
                ErrorKind::ProbeError,
                "Offset output is not numeric",
                format!("`{line}`"),
                source: err
            ),
        }
    }

    Ok(total)
}

/// Extracts `field` from every JSON line, skipping consumer noise and records without it.
fn parse_json_keys(output: &str, field: &str) -> Vec<i64> {
    let mut skipped = 0usize;
    let keys: Vec<i64> = output
        .lines()
        .filter_map(|line| {
            let key = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|value| value.get(field).and_then(serde_json::Value::as_i64));
            if key.is_none() && !line.trim().is_empty() {
                skipped += 1;
            }
            key
        })
        .collect();

    if skipped > 0 {
        warn!(field, skipped, "skipped lines without an integer key");
    }

    keys
}

/// Name an archived table takes on rotation, e.g. `person_101423` for day 10, 14:23.
fn rotated_table_name(table: &str, at: &chrono::DateTime<Utc>) -> String {
    format!("{table}_{}", at.format("%d%H%M"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn end_offsets_are_summed_across_partitions() {
        let output = "mysql_person:0:1200\nmysql_person:1:1300\n\nmysql_person:2:1500\n";
        assert_eq!(sum_end_offsets(output).unwrap(), 4_000);
    }

    #[test]
    fn empty_offset_output_counts_zero() {
        assert_eq!(sum_end_offsets("").unwrap(), 0);
    }

    #[test]
    fn garbage_offsets_are_probe_errors() {
        let err = sum_end_offsets("Error while fetching metadata").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProbeError);
    }

    #[test]
    fn json_keys_skip_noise_lines() {
        let output = concat!(
            "{\"pid\": 1, \"name\": \"Bob\"}\n",
            "[2024-01-01 00:00:00] WARN consumer timed out\n",
            "{\"pid\": 2}\n",
            "{\"name\": \"no pid\"}\n",
            "Processed a total of 3 messages\n",
        );
        assert_eq!(parse_json_keys(output, "pid"), vec![1, 2]);
    }

    #[test]
    fn templates_substitute_every_placeholder() {
        let rendered = render(
            "count {bucket}/{prefix} --bucket={bucket}",
            &[("{bucket}", "sink"), ("{prefix}", "topics")],
        );
        assert_eq!(rendered, "count sink/topics --bucket=sink");
    }

    #[test]
    fn rotated_name_uses_day_hour_minute() {
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 14, 23, 5).unwrap();
        assert_eq!(rotated_table_name("person", &at), "person_101423");
    }
}
