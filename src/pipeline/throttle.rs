//! Minimum-interval request throttling.
//!
//! A [`ThrottleGate`] enforces a single interval between dispatches for the
//! whole pipeline, regardless of host. The first request always proceeds
//! immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative throttle delay.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Pipeline-wide minimum delay between dispatched requests.
///
/// Shared through the owning pipeline; `wait` holds an async mutex across the
/// sleep so concurrent callers are spaced out one interval apart.
#[derive(Debug)]
pub struct ThrottleGate {
    /// `None` when throttling is disabled.
    interval: Option<Duration>,

    /// Time of the last recorded dispatch; `None` until the first one.
    last_dispatch: Mutex<Option<Instant>>,

    /// Total delay applied so far, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

impl ThrottleGate {
    /// Creates a gate allowing at most `requests_per_minute` dispatches per
    /// minute. Zero, negative or non-finite rates disable throttling; rates
    /// too small to express as an interval wait `Duration::MAX`.
    #[must_use]
    #[instrument]
    pub fn new(requests_per_minute: f64) -> Self {
        let interval = (requests_per_minute.is_finite() && requests_per_minute > 0.0).then(|| {
            Duration::try_from_secs_f64(60.0 / requests_per_minute).unwrap_or(Duration::MAX)
        });
        debug!(?interval, "creating throttle gate");
        Self {
            interval,
            last_dispatch: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a gate that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0.0)
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.interval.is_none()
    }

    /// Minimum spacing between dispatches, if enabled.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Total time spent waiting in this gate.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    /// Waits until the interval has elapsed since the previous dispatch, then
    /// records the current time as the new dispatch time.
    pub async fn wait(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let mut last_dispatch = self.last_dispatch.lock().await;

        if let Some(last) = *last_dispatch {
            let elapsed = last.elapsed();
            if elapsed < interval {
                let delay = interval.saturating_sub(elapsed);
                let cumulative = self.add_cumulative_delay(delay);

                debug!(
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "throttling request"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive throttling - consider raising requests_per_minute"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        }

        *last_dispatch = Some(Instant::now());
    }

    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let previous = self
            .cumulative_delay_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                Some(total.saturating_add(delay_ms))
            })
            .unwrap_or_default();
        Duration::from_millis(previous.saturating_add(delay_ms))
    }
}
