//! Concurrent producer and consumer workloads against the source system.

mod driver;
mod row;
mod source;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub use driver::{WorkerHandle, WorkerResult, WorkloadDriver};
pub use row::{RowGenerator, SourceRow};
pub use source::{RowSource, RowSourceFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Writes rows to the source.
    Insert,
    /// Reads samples back from the source, for observability only.
    Select,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Insert => f.write_str("insert"),
            WorkerKind::Select => f.write_str("select"),
        }
    }
}

/// Identity of a worker within one scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerKey {
    pub kind: WorkerKind,
    pub id: u32,
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

/// Value written to the `pid` column of inserted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PidMode {
    /// Every row carries the worker id.
    #[default]
    WorkerId,
    /// Every row carries the index of its batch, so keys increase with time.
    BatchIndex,
}

/// One unit of concurrent work.
///
/// For insert workers `target_count` is the number of rows to write in batches of
/// `batch_size`. For select workers it is the number of sample reads, each bounded by
/// `batch_size` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub kind: WorkerKind,
    pub id: u32,
    pub target_count: u64,
    pub batch_size: u64,
    /// Delay after scenario start before the worker begins.
    pub start_offset: Duration,
    pub pid_mode: PidMode,
}

impl WorkerSpec {
    pub fn insert(id: u32, target_count: u64, batch_size: u64) -> Self {
        Self {
            kind: WorkerKind::Insert,
            id,
            target_count,
            batch_size,
            start_offset: Duration::ZERO,
            pid_mode: PidMode::WorkerId,
        }
    }

    pub fn select(id: u32, reads: u64, sample_size: u64) -> Self {
        Self {
            kind: WorkerKind::Select,
            id,
            target_count: reads,
            batch_size: sample_size,
            start_offset: Duration::ZERO,
            pid_mode: PidMode::WorkerId,
        }
    }

    pub fn with_start_offset(mut self, start_offset: Duration) -> Self {
        self.start_offset = start_offset;
        self
    }

    pub fn with_pid_mode(mut self, pid_mode: PidMode) -> Self {
        self.pid_mode = pid_mode;
        self
    }

    pub fn key(&self) -> WorkerKey {
        WorkerKey {
            kind: self.kind,
            id: self.id,
        }
    }

    /// Number of batches an insert worker writes.
    pub fn batch_count(&self) -> u64 {
        if self.batch_size == 0 {
            return 0;
        }
        self.target_count.div_ceil(self.batch_size)
    }
}

/// Builds `count` insert workers with ids `1..=count`, staggered by `stagger`.
pub fn insert_workers(count: u32, rows_per_worker: u64, batch_size: u64, stagger: Duration) -> Vec<WorkerSpec> {
    (1..=count)
        .map(|id| {
            WorkerSpec::insert(id, rows_per_worker, batch_size)
                .with_start_offset(stagger * (id - 1))
        })
        .collect()
}

/// Builds `count` select workers with ids `1..=count`.
pub fn select_workers(count: u32, reads: u64, sample_size: u64) -> Vec<WorkerSpec> {
    (1..=count)
        .map(|id| WorkerSpec::select(id, reads, sample_size))
        .collect()
}
