use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Random pause between primitive interactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let ms = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }

    /// Sleeps for a random delay. Returns `false` if `cancel` fired first.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
