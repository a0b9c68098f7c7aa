use crate::error::HarnessResult;
use crate::workload::{SourceRow, WorkerKey};

/// A connection to the source system owned by a single worker.
pub trait RowSource: Send {
    /// Inserts the rows as one batch.
    ///
    /// Fails with [`crate::error::ErrorKind::WriteError`] when the source rejects the batch
    /// and with [`crate::error::ErrorKind::ConnectionError`] when it cannot be reached.
    fn insert(&mut self, rows: &[SourceRow]) -> impl Future<Output = HarnessResult<()>> + Send;

    fn row_count(&mut self) -> impl Future<Output = HarnessResult<u64>> + Send;

    /// Reads at most `limit` rows and returns how many were read.
    fn select_sample(&mut self, limit: u64) -> impl Future<Output = HarnessResult<u64>> + Send;
}

/// Opens one [`RowSource`] per worker, so workers never share a connection.
pub trait RowSourceFactory: Clone + Send + Sync + 'static {
    type Source: RowSource + 'static;

    fn connect(&self, worker: WorkerKey) -> impl Future<Output = HarnessResult<Self::Source>> + Send;
}
