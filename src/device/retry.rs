use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use bon::Builder;
use tokio::time::sleep;
use tracing::{debug, warn};

const DEFAULT_MAX_RETRIES: u32 = 20;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay multiplied by the number of the attempt that just failed.
    Linear,
}

/// Bounded retry budget shared by every stage of one operation.
#[derive(Debug, Clone, Builder)]
pub struct RetryPolicy {
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
    #[builder(default = DEFAULT_RETRY_DELAY)]
    delay: Duration,
    #[builder(default)]
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Failure of a single attempt, classified for the retry loop.
#[derive(Debug)]
pub enum Attempt<E> {
    /// The expected signal never arrived; another attempt may succeed.
    Transient(E),
    /// Retrying cannot help; the loop ends immediately.
    Fatal(E),
}

/// Terminal outcome of a retry loop that did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed transiently.
    GiveUp { attempts: u32, last: E },
    /// One attempt failed fatally.
    Fatal(E),
}

impl RetryPolicy {
    /// Returns the number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the total number of attempts the policy allows.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the pause taken after attempt number `attempt` failed.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt.max(1)),
        }
    }

    /// Runs `operation` until it succeeds, fails fatally, or the budget runs
    /// out. Attempts are numbered from one; the pause only happens between
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Fatal`] for the first fatal attempt and
    /// [`RetryError::GiveUp`] once `max_retries + 1` attempts have failed.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    debug!(label, attempt, "attempt succeeded");
                    return Ok(value);
                }
                Err(Attempt::Fatal(error)) => {
                    warn!(label, attempt, %error, "attempt failed fatally");
                    return Err(RetryError::Fatal(error));
                }
                Err(Attempt::Transient(error)) if attempt >= max_attempts => {
                    warn!(label, attempts = attempt, %error, "giving up");
                    return Err(RetryError::GiveUp {
                        attempts: attempt,
                        last: error,
                    });
                }
                Err(Attempt::Transient(error)) => {
                    let delay = self.delay_after(attempt);
                    warn!(label, attempt, %error, ?delay, "attempt failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
