use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bail;
use crate::clock::{Clock, TokioClock};
use crate::control::{ClusterControl, Resource};
use crate::convergence::{ConvergenceResult, CountProbe, Sample};
use crate::error::{ErrorKind, HarnessResult};

/// Upper bound for a single count query.
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls a destination count until it satisfies a probe or a timeout expires.
///
/// Every tick issues a fresh query through the [`ClusterControl`]. A tick whose query cannot
/// reach the destination is skipped; a reading that is not a valid count aborts the wait.
#[derive(Debug)]
pub struct ConvergenceChecker<K, C = TokioClock> {
    control: Arc<K>,
    clock: C,
    query_timeout: Duration,
}

impl<K> ConvergenceChecker<K, TokioClock>
where
    K: ClusterControl,
{
    pub fn new(control: Arc<K>) -> Self {
        Self::with_clock(control, TokioClock::new())
    }
}

impl<K, C> ConvergenceChecker<K, C>
where
    K: ClusterControl,
    C: Clock,
{
    pub fn with_clock(control: Arc<K>, clock: C) -> Self {
        Self {
            control,
            clock,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Polls every `poll_interval` until the probe is satisfied or `timeout` has elapsed.
    ///
    /// Returns within `timeout + poll_interval` in every case. Not converging is a result,
    /// not an error.
    pub async fn wait_for(
        &self,
        probe: &CountProbe,
        poll_interval: Duration,
        timeout: Duration,
    ) -> HarnessResult<ConvergenceResult> {
        if poll_interval.is_zero() {
            bail!(
                ErrorKind::InvalidScenario,
                "Poll interval must be greater than zero",
                probe
            );
        }

        let start = self.clock.now();
        let deadline = start + timeout;
        let hard_deadline = deadline + poll_interval;
        let mut samples: Vec<Sample> = Vec::new();

        loop {
            if let Some(count) = self.read_count(&probe.resource, hard_deadline).await? {
                let at = self.clock.now().saturating_duration_since(start);

                if let (Resource::Topic(_), Some(previous)) = (&probe.resource, samples.last()) {
                    if count < previous.count {
                        warn!(
                            resource = %probe.resource,
                            previous = previous.count,
                            count,
                            "topic count decreased between samples"
                        );
                    }
                }

                debug!(resource = %probe.resource, count, at_ms = at.as_millis() as u64, "probe sample");
                samples.push(Sample { at, count });

                if is_satisfied(probe, &samples, poll_interval) {
                    info!(
                        probe = %probe,
                        count,
                        elapsed_ms = at.as_millis() as u64,
                        "probe converged"
                    );
                    return Ok(finish(probe, true, at, samples));
                }
            }

            let now = self.clock.now();
            if now >= deadline {
                let elapsed = now.saturating_duration_since(start);
                warn!(
                    probe = %probe,
                    last_count = samples.last().map(|s| s.count),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "probe did not converge before timeout"
                );
                return Ok(finish(probe, false, elapsed, samples));
            }

            self.clock.sleep(poll_interval).await;
        }
    }

    /// Reads the current count, bounded by the query timeout and the hard deadline.
    ///
    /// Returns `None` when the tick has to be skipped.
    async fn read_count(&self, resource: &Resource, hard_deadline: Instant) -> HarnessResult<Option<u64>> {
        let now = self.clock.now();
        let budget = self
            .query_timeout
            .min(hard_deadline.saturating_duration_since(now));

        let reading = tokio::select! {
            biased;
            reading = self.control.query_count(resource, budget) => reading,
            _ = self.clock.sleep_until(now + budget) => {
                warn!(%resource, budget_ms = budget.as_millis() as u64, "count query timed out, skipping tick");
                return Ok(None);
            }
        };

        match reading {
            Ok(raw) if raw < 0 => bail!(
                ErrorKind::ProbeError,
                "Probe returned a negative count",
                format!("{resource} returned {raw}")
            ),
            Ok(raw) => Ok(Some(raw as u64)),
            Err(err) if err.kind() == ErrorKind::ConnectionError => {
                warn!(%resource, error = %err, "count query failed, skipping tick");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

fn is_satisfied(probe: &CountProbe, samples: &[Sample], poll_interval: Duration) -> bool {
    let Some(last) = samples.last() else {
        return false;
    };

    if !probe.comparison.holds(last.count, probe.expected) {
        return false;
    }

    // Empty-resource assertions settle on the first sample.
    if probe.expected == 0 || !probe.comparison.needs_stability() {
        return true;
    }

    match samples.len().checked_sub(2).map(|i| samples[i]) {
        Some(previous) => previous.count == last.count && last.at - previous.at >= poll_interval,
        None => false,
    }
}

fn finish(probe: &CountProbe, converged: bool, elapsed: Duration, samples: Vec<Sample>) -> ConvergenceResult {
    ConvergenceResult {
        probe: probe.clone(),
        final_count: samples.last().map(|s| s.count).unwrap_or(0),
        converged,
        elapsed,
        samples,
    }
}
