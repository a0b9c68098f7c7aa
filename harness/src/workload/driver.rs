use std::collections::BTreeMap;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, HarnessError, HarnessResult};
use crate::failpoints::{WORKLOAD_BEFORE_INSERT_BATCH, harness_fail_point};
use crate::harness_error;
use crate::workload::{
    RowGenerator, RowSource, RowSourceFactory, WorkerKey, WorkerKind, WorkerSpec,
};

/// Completion record of one worker.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub key: WorkerKey,
    pub target_count: u64,
    /// Rows written (insert) or read (select) before the worker stopped.
    pub records: u64,
    /// Time spent working, excluding the start offset.
    pub elapsed: Duration,
    pub error: Option<HarnessError>,
}

impl WorkerResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Records per second over the worker's lifetime.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return self.records as f64;
        }
        self.records as f64 / secs
    }
}

/// Handle to a spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    key: WorkerKey,
    abort_handle: AbortHandle,
}

impl WorkerHandle {
    pub fn key(&self) -> WorkerKey {
        self.key
    }

    pub fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }
}

/// Runs workers as independent tasks and collects their results.
///
/// A failing worker never cancels its siblings; its error is recorded in its
/// [`WorkerResult`].
#[derive(Debug)]
pub struct WorkloadDriver<F> {
    factory: F,
    join_set: JoinSet<WorkerResult>,
    /// Workers spawned but not yet collected, with their target counts.
    pending: BTreeMap<WorkerKey, u64>,
    completed: Vec<WorkerResult>,
    aborted: bool,
}

impl<F> WorkloadDriver<F>
where
    F: RowSourceFactory,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            join_set: JoinSet::new(),
            pending: BTreeMap::new(),
            completed: Vec::new(),
            aborted: false,
        }
    }

    /// Starts one task per spec.
    ///
    /// Specs whose key is already running are skipped with a warning.
    pub fn spawn(&mut self, specs: Vec<WorkerSpec>) -> Vec<WorkerHandle> {
        let mut handles = Vec::with_capacity(specs.len());

        for spec in specs {
            let key = spec.key();
            if self.pending.contains_key(&key) {
                warn!(worker_kind = %key.kind, worker_id = key.id, "worker already running, skipping");
                continue;
            }

            self.pending.insert(key, spec.target_count);
            let factory = self.factory.clone();
            let abort_handle = self.join_set.spawn(run_worker(factory, spec));

            debug!(worker_kind = %key.kind, worker_id = key.id, "spawned worker");
            handles.push(WorkerHandle { key, abort_handle });
        }

        handles
    }

    /// Waits until every spawned worker has finished and returns their results in
    /// completion order.
    ///
    /// Cancel safe: if the returned future is dropped, results collected so far are kept
    /// and returned by the next call.
    pub async fn join_all(&mut self) -> Vec<WorkerResult> {
        let mut panics = Vec::new();

        while let Some(joined) = self.join_set.join_next().await {
            match joined {
                Ok(result) => {
                    self.pending.remove(&result.key);
                    self.completed.push(result);
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("worker task was cancelled");
                    } else {
                        error!(error = %join_err, "worker task panicked");
                        panics.push(join_err.to_string());
                    }
                }
            }
        }

        // Workers that never reported either panicked or were aborted.
        let pending = std::mem::take(&mut self.pending);
        for (key, target_count) in pending {
            let error = if self.aborted {
                harness_error!(
                    ErrorKind::ScenarioTimedOut,
                    "Worker was aborted before completing",
                    key
                )
            } else {
                harness_error!(ErrorKind::WorkerPanic, "Worker panicked", panics.join("; "))
            };

            self.completed.push(WorkerResult {
                key,
                target_count,
                records: 0,
                elapsed: Duration::ZERO,
                error: Some(error),
            });
        }

        std::mem::take(&mut self.completed)
    }

    /// Aborts every running worker; their results are reported by [`Self::join_all`].
    pub fn abort_all(&mut self) {
        if !self.join_set.is_empty() {
            warn!(running = self.join_set.len(), "aborting running workers");
        }
        self.aborted = true;
        self.join_set.abort_all();
    }
}

async fn run_worker<F>(factory: F, spec: WorkerSpec) -> WorkerResult
where
    F: RowSourceFactory,
{
    let key = spec.key();
    if !spec.start_offset.is_zero() {
        tokio::time::sleep(spec.start_offset).await;
    }

    let started = Instant::now();
    let mut records = 0;
    let result = match factory.connect(key).await {
        Ok(mut source) => match spec.kind {
            WorkerKind::Insert => insert_rows(&mut source, &spec, &mut records).await,
            WorkerKind::Select => select_rows(&mut source, &spec, &mut records).await,
        },
        Err(err) => Err(err),
    };
    let elapsed = started.elapsed();

    let result = WorkerResult {
        key,
        target_count: spec.target_count,
        records,
        elapsed,
        error: result.err(),
    };

    match &result.error {
        None => info!(
            worker_kind = %key.kind,
            worker_id = key.id,
            records,
            elapsed_ms = elapsed.as_millis() as u64,
            records_per_sec = result.throughput() as u64,
            "worker finished"
        ),
        Some(err) => error!(
            worker_kind = %key.kind,
            worker_id = key.id,
            records,
            error = %err,
            "worker failed"
        ),
    }

    result
}

/// Writes `target_count` rows in batches, in increasing sequence order.
async fn insert_rows<S>(source: &mut S, spec: &WorkerSpec, written: &mut u64) -> HarnessResult<()>
where
    S: RowSource,
{
    let mut generator = RowGenerator::new(spec);

    for batch_index in 0..spec.batch_count() {
        harness_fail_point(WORKLOAD_BEFORE_INSERT_BATCH)?;

        let len = spec.batch_size.min(spec.target_count - *written);
        let rows = generator.batch(batch_index, len);
        source.insert(&rows).await?;
        *written += len;
    }

    Ok(())
}

async fn select_rows<S>(source: &mut S, spec: &WorkerSpec, read: &mut u64) -> HarnessResult<()>
where
    S: RowSource,
{
    for _ in 0..spec.target_count {
        *read += source.select_sample(spec.batch_size).await?;
        tokio::task::yield_now().await;
    }

    let total = source.row_count().await?;
    debug!(worker_id = spec.id, rows_in_source = total, "select worker done");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::workload::{SourceRow, insert_workers};

    /// Counts inserted rows; worker `fail_id` is rejected after its first batch.
    #[derive(Clone, Default)]
    struct CountingFactory {
        inserted: Arc<AtomicU64>,
        fail_id: Option<u32>,
        panic_id: Option<u32>,
    }

    struct CountingSource {
        worker: WorkerKey,
        batches: u64,
        factory: CountingFactory,
    }

    impl RowSource for CountingSource {
        async fn insert(&mut self, rows: &[SourceRow]) -> HarnessResult<()> {
            if self.factory.panic_id == Some(self.worker.id) {
                panic!("worker {} exploded", self.worker);
            }
            if self.factory.fail_id == Some(self.worker.id) && self.batches == 1 {
                return Err(harness_error!(ErrorKind::WriteError, "Insert rejected"));
            }
            self.batches += 1;
            self.factory
                .inserted
                .fetch_add(rows.len() as u64, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        }

        async fn row_count(&mut self) -> HarnessResult<u64> {
            Ok(self.factory.inserted.load(Ordering::SeqCst))
        }

        async fn select_sample(&mut self, limit: u64) -> HarnessResult<u64> {
            Ok(limit.min(self.factory.inserted.load(Ordering::SeqCst)))
        }
    }

    impl RowSourceFactory for CountingFactory {
        type Source = CountingSource;

        async fn connect(&self, worker: WorkerKey) -> HarnessResult<CountingSource> {
            Ok(CountingSource {
                worker,
                batches: 0,
                factory: self.clone(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn all_workers_complete_their_target() {
        let factory = CountingFactory::default();
        let mut driver = WorkloadDriver::new(factory.clone());

        let handles = driver.spawn(insert_workers(4, 1_000, 100, Duration::ZERO));
        assert_eq!(handles.len(), 4);

        let results = driver.join_all().await;
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|result| result.is_success()));
        assert!(results.iter().all(|result| result.records == 1_000));
        assert_eq!(factory.inserted.load(Ordering::SeqCst), 4_000);
        // Workers run concurrently: 10 batches of 10ms each, not 40.
        assert!(results.iter().all(|result| result.elapsed == Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_worker_does_not_cancel_siblings() {
        let factory = CountingFactory {
            fail_id: Some(2),
            ..CountingFactory::default()
        };
        let mut driver = WorkloadDriver::new(factory.clone());
        driver.spawn(insert_workers(3, 500, 100, Duration::ZERO));

        let mut results = driver.join_all().await;
        results.sort_by_key(|result| result.key);

        assert_eq!(results[1].records, 100);
        assert_eq!(
            results[1].error.as_ref().map(|err| err.kind()),
            Some(ErrorKind::WriteError)
        );
        assert!(results[0].is_success() && results[2].is_success());
        assert_eq!(factory.inserted.load(Ordering::SeqCst), 1_100);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_worker_is_reported() {
        let factory = CountingFactory {
            panic_id: Some(1),
            ..CountingFactory::default()
        };
        let mut driver = WorkloadDriver::new(factory);
        driver.spawn(insert_workers(2, 100, 100, Duration::ZERO));

        let mut results = driver.join_all().await;
        results.sort_by_key(|result| result.key);

        assert_eq!(
            results[0].error.as_ref().map(|err| err.kind()),
            Some(ErrorKind::WorkerPanic)
        );
        assert!(results[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn start_offset_delays_the_worker() {
        let mut driver = WorkloadDriver::new(CountingFactory::default());
        let started = Instant::now();
        driver.spawn(vec![
            WorkerSpec::insert(1, 100, 100).with_start_offset(Duration::from_secs(2)),
        ]);

        let results = driver.join_all().await;
        assert_eq!(started.elapsed(), Duration::from_millis(2_010));
        assert_eq!(results[0].elapsed, Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_workers_are_reported_as_timed_out() {
        let mut driver = WorkloadDriver::new(CountingFactory::default());
        driver.spawn(insert_workers(2, 100_000, 100, Duration::ZERO));

        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.abort_all();
        let results = driver.join_all().await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| {
            result.error.as_ref().map(|err| err.kind()) == Some(ErrorKind::ScenarioTimedOut)
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn select_workers_read_bounded_samples() {
        let factory = CountingFactory::default();
        factory.inserted.store(30, Ordering::SeqCst);
        let mut driver = WorkloadDriver::new(factory);
        driver.spawn(vec![WorkerSpec::select(1, 5, 10)]);

        let results = driver.join_all().await;
        assert_eq!(results[0].records, 50);
    }
}
