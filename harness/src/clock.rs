//! Time source used by every timed harness component.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Monotonic time plus a matching wall-clock reading.
///
/// Polling, fault scheduling and scenario deadlines all go through this trait so tests
/// can drive them with simulated time.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Wall-clock time corresponding to [`Clock::now`].
    fn wall_now(&self) -> DateTime<Utc>;

    fn sleep_until(&self, deadline: Instant) -> impl Future<Output = ()> + Send;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.sleep_until(self.now() + duration)
    }
}

/// [`Clock`] backed by the tokio timer.
///
/// Wall-clock readings are derived from the monotonic clock, so they advance with paused
/// test time as well.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
    origin_wall: DateTime<Utc>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_wall: Utc::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.origin_wall + elapsed,
            Err(_) => Utc::now(),
        }
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wall_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let start_wall = clock.wall_now();
        let start = clock.now();

        clock.sleep(Duration::from_secs(90)).await;

        assert_eq!(clock.now() - start, Duration::from_secs(90));
        assert_eq!((clock.wall_now() - start_wall).num_seconds(), 90);
    }
}
