//! Bounded-attempt, exponentially-backed-off, deadline-aware driver for
//! idempotent operations (spec.md §4.4).

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// `(max_attempts, initial_delay, max_delay, deadline)` plus an optional
/// jitter fraction (SPEC_FULL addition, default `0.0` so unset callers get
/// exactly spec.md's defaults).
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub deadline: Option<Instant>,
    /// Fraction of the computed delay randomized away, `0.0..=1.0`.
    /// `0.0` (the default) disables jitter entirely.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            deadline: None,
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Applies spec.md §4.4's zero-value defaults field-by-field, so a
    /// caller that only sets `deadline` still gets `max_attempts=1`,
    /// `initial_delay=1s`, `max_delay=30s`.
    pub fn normalized(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if self.initial_delay.is_zero() {
            self.initial_delay = Duration::from_secs(1);
        }
        if self.max_delay.is_zero() {
            self.max_delay = Duration::from_secs(30);
        }
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(32);
        let doubled = self
            .initial_delay
            .saturating_mul(1u32.checked_shl(pow).unwrap_or(u32::MAX));
        doubled.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        use rand::Rng;
        let jitter = self.jitter.min(1.0);
        let mut rng = rand::thread_rng();
        let factor = 1.0 - jitter + rng.gen::<f64>() * (2.0 * jitter);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("operation exceeded its deadline")]
    Timeout,
    #[error("retry was cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(E),
}

/// Drives `operation` under `config`, retrying on `Err` until success, the
/// attempt cap, or the deadline/cancellation fires first.
///
/// `operation` receives the 1-indexed attempt number. Before each attempt,
/// the deadline and `cancel` are checked; on the last allowed attempt the
/// operation's own error is returned verbatim rather than a generic retry
/// error, matching spec.md's "on the last allowed attempt, return the
/// attempt's error unchanged."
pub async fn retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let config = config.clone().normalized();
    let mut attempt = 1u32;

    loop {
        if let Some(deadline) = config.deadline {
            if Instant::now() >= deadline {
                return Err(RetryError::Timeout);
            }
        }
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= config.max_attempts {
                    return Err(RetryError::Failed(error));
                }

                let mut delay = config.jittered(config.delay_for_attempt(attempt));
                if let Some(deadline) = config.deadline {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    delay = delay.min(remaining);
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                }

                attempt += 1;
            }
        }
    }
}
