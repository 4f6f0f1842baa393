//! Bounded retry with exponential backoff and a deterministic fallback.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait after the first failure; doubles after each further failure.
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}

/// Value produced by [`resilient_call`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    /// Attempts actually made.
    pub attempts: u32,
    /// True when every attempt failed and `value` is the fallback.
    pub fell_back: bool,
    /// Display form of the final error, when there was one.
    pub last_error: Option<String>,
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Waits `initial_delay * 2^k` after the k-th failure (never after the last one)
/// and returns `fallback` if nothing succeeded. Never returns an error.
pub async fn resilient_call<T, E, F, Fut>(policy: &RetryPolicy, fallback: T, mut op: F) -> Resolved<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<String> = None;

    for attempt in 0..max_attempts {
        match op().await {
            Ok(value) => {
                return Resolved {
                    value,
                    attempts: attempt + 1,
                    fell_back: false,
                    last_error,
                };
            }
            Err(err) => {
                let message = err.to_string();
                if attempt + 1 == max_attempts {
                    warn!(
                        attempts = max_attempts,
                        error = %message,
                        "attempts exhausted; using fallback value"
                    );
                    last_error = Some(message);
                    break;
                }
                let delay = backoff_delay(policy.initial_delay, attempt);
                debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "attempt failed; backing off"
                );
                last_error = Some(message);
                sleep(delay).await;
            }
        }
    }

    Resolved {
        value: fallback,
        attempts: max_attempts,
        fell_back: true,
        last_error,
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
