use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Bounded exponential backoff for reconnecting to the stream.
///
/// The n-th consecutive failure waits `min(base * 2^(n-1), max)`, e.g. with a base of 1s:
/// 1s, 2s, 4s, 8s, ... up to `max`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    /// The first delay is `base`; no delay exceeds `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Number of failures since the last [`reset`](Self::reset).
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let exp = (self.failures - 1).min(16);
        self.base.saturating_mul(1 << exp).min(self.max)
    }

    /// Forgets past failures; the next delay is `base` again.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
/// Returns `true` if the full duration elapsed.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
