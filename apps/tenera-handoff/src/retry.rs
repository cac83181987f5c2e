use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Bounded retry schedule for the remote persistence leg. Delays double
/// after each failed attempt up to `max_delay`, with a little jitter so a
/// burst of kiosks does not hammer the gate in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Self::default()
        }
    }

    fn jitter_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let cap = self.jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
    }

    /// Run `op` until it succeeds or the attempt budget is spent. Returns
    /// whether any attempt succeeded; per-attempt errors are logged, never
    /// propagated, since the caller proceeds either way.
    pub async fn run<F, Fut, E>(&self, mut op: F) -> bool
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let mut delay = self.initial_delay;
        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Ok(()) => {
                    debug!(
                        target: "handoff::retry",
                        attempt,
                        "attempt succeeded"
                    );
                    return true;
                }
                Err(err) => {
                    warn!(
                        target: "handoff::retry",
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed"
                    );
                }
            }
            if attempt < self.max_attempts {
                sleep(delay + self.jitter_delay()).await;
                delay = (delay * 2).min(self.max_delay);
            }
        }
        false
    }
}
