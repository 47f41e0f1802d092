use std::future::Future;

use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::retry::RetryConfig;

/// Exponential delay schedule with up to 10% jitter either way, capped at
/// `max_delay_ms` before jitter is applied.
#[derive(Debug, Clone)]
pub struct Backoff {
    next_ms: u64,
    max_ms: u64,
    multiplier: u64,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next_ms: config.initial_delay_ms.min(config.max_delay_ms),
            max_ms: config.max_delay_ms,
            multiplier: config.backoff_multiplier.max(1),
        }
    }

    /// The delay before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_ms;
        self.next_ms = base.saturating_mul(self.multiplier).min(self.max_ms);

        let jitter: f64 = rand::random_range(-0.1..=0.1);
        Duration::from_millis((base as f64 * (1.0 + jitter)) as u64)
    }
}

/// Calls `operation` until it succeeds or `max_attempts` calls have failed,
/// sleeping on a [`Backoff`] schedule in between. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = Backoff::new(config);
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(what, attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if attempt >= max_attempts {
            warn!(what, max_attempts, error = %error, "Giving up");
            return Err(error);
        }

        let delay = backoff.next_delay();
        debug!(
            what,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, backing off"
        );
        sleep(delay).await;
        attempt += 1;
    }
}
