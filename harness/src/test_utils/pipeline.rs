use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::bail;
use crate::control::{ClusterControl, ControlOutcome, FaultTarget, KeyReader, Resource};
use crate::error::{ErrorKind, HarnessResult};
use crate::fault::ProducerPath;
use crate::workload::{RowSource, RowSourceFactory, SourceRow, WorkerKey};

/// Shape of the simulated pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub topic: String,
    pub table: String,
    /// Sink destination fed from the topic, lagging one tick behind it.
    pub sink: Option<(String, String)>,
    /// VM hosting both the broker and the connector.
    pub vm: String,
    pub tick: Duration,
    /// Records the connector moves from the source log to the topic per tick.
    pub throughput_per_tick: usize,
    /// The connector commits its source offset every this many productive ticks.
    pub commit_every_ticks: u32,
    /// Simulated round trip of one insert batch.
    pub insert_latency: Duration,
    pub producer_path: ProducerPath,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            topic: "person".to_string(),
            table: "person".to_string(),
            sink: None,
            vm: "kafka-vm".to_string(),
            tick: Duration::from_millis(100),
            throughput_per_tick: 500,
            commit_every_ticks: 10,
            insert_latency: Duration::from_millis(50),
            producer_path: ProducerPath::Source,
        }
    }
}

/// A row as it travels through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRecord {
    pub pid: i64,
    pub seq: i64,
}

impl PipelineRecord {
    fn field(&self, field: &str) -> Option<i64> {
        match field {
            "pid" => Some(self.pid),
            "seq" => Some(self.seq),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Change log of every row ever written to the source, across rotations.
    source_log: Vec<PipelineRecord>,
    table: Vec<PipelineRecord>,
    archived: HashMap<String, Vec<PipelineRecord>>,
    topic: Vec<PipelineRecord>,
    sink_count: u64,
    previous_topic_len: u64,
    broker_up: bool,
    connector_up: bool,
    /// Source log position the connector has produced up to.
    read_offset: usize,
    /// Last source log position the connector committed.
    committed_offset: usize,
    productive_ticks: u32,
    // Fault toggles.
    control_unreachable: bool,
    source_unreachable: bool,
    reject_writes_after: Option<u64>,
    corrupt_counts: bool,
    failing_count_queries: u32,
    writes: u64,
}

impl Inner {
    fn pump(&mut self, settings: &PipelineSettings) {
        self.sink_count = self.previous_topic_len;
        self.previous_topic_len = self.topic.len() as u64;

        if !(self.broker_up && self.connector_up) {
            return;
        }

        let end = (self.read_offset + settings.throughput_per_tick).min(self.source_log.len());
        if end == self.read_offset {
            return;
        }

        self.topic.extend_from_slice(&self.source_log[self.read_offset..end]);
        self.read_offset = end;
        self.productive_ticks += 1;
        if self.productive_ticks % settings.commit_every_ticks.max(1) == 0 {
            self.committed_offset = self.read_offset;
        }
    }

    /// The connector restarts from its last committed offset.
    fn lose_uncommitted(&mut self) {
        self.read_offset = self.committed_offset;
    }

    fn commit(&mut self) {
        self.committed_offset = self.read_offset;
    }
}

#[derive(Debug)]
struct PumpGuard(AbortHandle);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// In-process stand-in for a source database, a CDC connector, a broker and a sink.
///
/// Every tick the connector copies records from the source change log to the topic, and
/// commits its position every few ticks. A graceful stop commits first; a kill throws away
/// the uncommitted position, so the records after the last commit are produced again once
/// the pipeline is back. With [`ProducerPath::Broker`] workers write straight to the topic
/// and rows sent while the broker is down are lost.
///
/// Must be created inside a tokio runtime; the connector task stops when the last clone is
/// dropped.
#[derive(Debug, Clone)]
pub struct MemoryPipeline {
    inner: Arc<Mutex<Inner>>,
    settings: Arc<PipelineSettings>,
    _pump: Arc<PumpGuard>,
}

impl MemoryPipeline {
    pub fn new() -> Self {
        Self::with_settings(PipelineSettings::default())
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            broker_up: true,
            connector_up: true,
            ..Default::default()
        }));
        let settings = Arc::new(settings);

        let pump = tokio::spawn(run_connector(inner.clone(), settings.clone()));

        Self {
            inner,
            settings,
            _pump: Arc::new(PumpGuard(pump.abort_handle())),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn topic(&self) -> Resource {
        Resource::Topic(self.settings.topic.clone())
    }

    pub fn table(&self) -> Resource {
        Resource::Table(self.settings.table.clone())
    }

    pub fn sink(&self) -> Option<Resource> {
        self.settings
            .sink
            .as_ref()
            .map(|(bucket, prefix)| Resource::ObjectPrefix {
                bucket: bucket.clone(),
                prefix: prefix.clone(),
            })
    }

    pub async fn set_control_unreachable(&self, unreachable: bool) {
        self.inner.lock().await.control_unreachable = unreachable;
    }

    pub async fn set_source_unreachable(&self, unreachable: bool) {
        self.inner.lock().await.source_unreachable = unreachable;
    }

    /// Rejects every insert once `rows` rows have been written.
    pub async fn reject_writes_after(&self, rows: u64) {
        self.inner.lock().await.reject_writes_after = Some(rows);
    }

    /// Makes count queries report `-1`.
    pub async fn set_corrupt_counts(&self, corrupt: bool) {
        self.inner.lock().await.corrupt_counts = corrupt;
    }

    /// Fails the next `queries` count queries with a connection error.
    pub async fn fail_count_queries(&self, queries: u32) {
        self.inner.lock().await.failing_count_queries = queries;
    }

    pub async fn topic_len(&self) -> u64 {
        self.inner.lock().await.topic.len() as u64
    }

    pub async fn source_log_len(&self) -> u64 {
        self.inner.lock().await.source_log.len() as u64
    }

    pub async fn committed_offset(&self) -> u64 {
        self.inner.lock().await.committed_offset as u64
    }

    pub async fn is_up(&self, target: &FaultTarget) -> bool {
        let inner = self.inner.lock().await;
        match target {
            FaultTarget::Broker => inner.broker_up,
            FaultTarget::Connector => inner.connector_up,
            FaultTarget::Vm(_) => inner.broker_up || inner.connector_up,
            FaultTarget::Table(_) => true,
        }
    }

    /// Broker and connector flags a target maps onto.
    fn components(&self, target: &FaultTarget) -> HarnessResult<(bool, bool)> {
        match target {
            FaultTarget::Broker => Ok((true, false)),
            FaultTarget::Connector => Ok((false, true)),
            FaultTarget::Vm(name) if *name == self.settings.vm => Ok((true, true)),
            _ => bail!(
                ErrorKind::InvalidScenario,
                "Target is not part of the memory pipeline",
                target
            ),
        }
    }

    async fn stop_components(&self, target: &FaultTarget, graceful: bool) -> HarnessResult<ControlOutcome> {
        let (broker, connector) = self.components(target)?;
        let mut inner = self.inner.lock().await;
        check_control(&inner)?;

        let running = (broker && inner.broker_up) || (connector && inner.connector_up);
        if !running {
            return Ok(ControlOutcome::AlreadyInState);
        }

        if graceful {
            inner.commit();
        } else {
            inner.lose_uncommitted();
        }
        if broker {
            inner.broker_up = false;
        }
        if connector {
            inner.connector_up = false;
        }

        debug!(fault_target = %target, graceful, "memory pipeline stopped component");
        Ok(ControlOutcome::Applied)
    }

    async fn start_components(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        let (broker, connector) = self.components(target)?;
        let mut inner = self.inner.lock().await;
        check_control(&inner)?;

        let stopped = (broker && !inner.broker_up) || (connector && !inner.connector_up);
        if !stopped {
            return Ok(ControlOutcome::AlreadyInState);
        }

        if broker {
            inner.broker_up = true;
        }
        if connector {
            inner.connector_up = true;
        }

        debug!(fault_target = %target, "memory pipeline started component");
        Ok(ControlOutcome::Applied)
    }
}

impl Default for MemoryPipeline {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_connector(inner: Arc<Mutex<Inner>>, settings: Arc<PipelineSettings>) {
    let mut interval = tokio::time::interval(settings.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        inner.lock().await.pump(&settings);
    }
}

fn check_control(inner: &Inner) -> HarnessResult<()> {
    if inner.control_unreachable {
        bail!(
            ErrorKind::ConnectionError,
            "Control channel is unreachable"
        );
    }
    Ok(())
}

impl ClusterControl for MemoryPipeline {
    async fn stop(&self, target: &FaultTarget, graceful: bool) -> HarnessResult<ControlOutcome> {
        self.stop_components(target, graceful).await
    }

    async fn kill(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        self.stop_components(target, false).await
    }

    async fn start(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        self.start_components(target).await
    }

    async fn restart(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        self.stop_components(target, true).await?;
        self.start_components(target).await?;
        Ok(ControlOutcome::Applied)
    }

    async fn rotate(&self, target: &FaultTarget) -> HarnessResult<ControlOutcome> {
        let FaultTarget::Table(table) = target else {
            bail!(ErrorKind::InvalidScenario, "Only tables can be rotated", target);
        };

        let mut inner = self.inner.lock().await;
        check_control(&inner)?;
        if *table != self.settings.table {
            bail!(ErrorKind::InvalidScenario, "Unknown source table", table);
        }

        let archived_name = format!("{table}_{}", inner.archived.len() + 1);
        let rows = std::mem::take(&mut inner.table);
        debug!(%table, archived = %archived_name, rows = rows.len(), "memory pipeline rotated table");
        inner.archived.insert(archived_name, rows);

        Ok(ControlOutcome::Applied)
    }

    async fn query_count(&self, resource: &Resource, _timeout: Duration) -> HarnessResult<i64> {
        let mut inner = self.inner.lock().await;

        if inner.failing_count_queries > 0 {
            inner.failing_count_queries -= 1;
            bail!(ErrorKind::ConnectionError, "Count query could not reach the destination", resource);
        }
        if inner.corrupt_counts {
            return Ok(-1);
        }

        let count = match resource {
            Resource::Topic(topic) if *topic == self.settings.topic => inner.topic.len() as u64,
            Resource::Topic(_) => 0,
            Resource::Table(table) if *table == self.settings.table => inner.table.len() as u64,
            Resource::Table(table) => match inner.archived.get(table) {
                Some(rows) => rows.len() as u64,
                None => bail!(ErrorKind::InvalidScenario, "Unknown table", table),
            },
            Resource::ObjectPrefix { .. } if self.sink().as_ref() == Some(resource) => inner.sink_count,
            Resource::ObjectPrefix { .. } => 0,
        };

        Ok(count as i64)
    }
}

impl KeyReader for MemoryPipeline {
    async fn read_keys(&self, resource: &Resource, field: &str) -> HarnessResult<Vec<i64>> {
        let inner = self.inner.lock().await;

        let records = match resource {
            Resource::Topic(topic) if *topic == self.settings.topic => &inner.topic,
            Resource::Table(table) if *table == self.settings.table => &inner.table,
            _ => bail!(ErrorKind::InvalidScenario, "Keys cannot be read from resource", resource),
        };

        records
            .iter()
            .map(|record| match record.field(field) {
                Some(key) => Ok(key),
                None => bail!(ErrorKind::InvalidScenario, "Unknown key field", field),
            })
            .collect()
    }
}

/// A worker's handle on the memory pipeline.
#[derive(Debug)]
pub struct MemoryRowSource {
    pipeline: MemoryPipeline,
    worker: WorkerKey,
}

impl RowSourceFactory for MemoryPipeline {
    type Source = MemoryRowSource;

    async fn connect(&self, worker: WorkerKey) -> HarnessResult<MemoryRowSource> {
        if self.inner.lock().await.source_unreachable {
            bail!(ErrorKind::ConnectionError, "Source is unreachable", worker);
        }

        Ok(MemoryRowSource {
            pipeline: self.clone(),
            worker,
        })
    }
}

impl RowSource for MemoryRowSource {
    async fn insert(&mut self, rows: &[SourceRow]) -> HarnessResult<()> {
        tokio::time::sleep(self.pipeline.settings.insert_latency).await;

        let mut inner = self.pipeline.inner.lock().await;
        if inner.source_unreachable {
            bail!(ErrorKind::ConnectionError, "Source is unreachable", self.worker);
        }
        if let Some(limit) = inner.reject_writes_after {
            if inner.writes + rows.len() as u64 > limit {
                bail!(ErrorKind::WriteError, "Source rejected the batch", self.worker);
            }
        }

        let records = rows.iter().map(|row| PipelineRecord {
            pid: row.pid,
            seq: row.seq,
        });
        match self.pipeline.settings.producer_path {
            ProducerPath::Source => {
                let records: Vec<_> = records.collect();
                inner.table.extend_from_slice(&records);
                inner.source_log.extend(records);
            }
            ProducerPath::Broker if inner.broker_up => inner.topic.extend(records),
            // Sent to a dead broker.
            ProducerPath::Broker => {}
        }
        inner.writes += rows.len() as u64;

        Ok(())
    }

    async fn row_count(&mut self) -> HarnessResult<u64> {
        let inner = self.pipeline.inner.lock().await;
        Ok(inner.table.len() as u64)
    }

    async fn select_sample(&mut self, limit: u64) -> HarnessResult<u64> {
        let inner = self.pipeline.inner.lock().await;
        if inner.source_unreachable {
            bail!(ErrorKind::ConnectionError, "Source is unreachable", self.worker);
        }
        Ok((inner.table.len() as u64).min(limit))
    }
}
