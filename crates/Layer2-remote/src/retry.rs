//! Retry logic with exponential backoff

use sessioncache_foundation::RemoteTierConfig;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry behaviour for remote calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first call
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub multiplier: f64,

    /// Maximum delay between attempts (milliseconds)
    pub max_delay_ms: u64,

    /// Spread delays by ±20%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30000,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteTierConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            base_delay_ms: config.retry_base_delay_ms,
            jitter: config.retry_jitter,
            ..Default::default()
        }
    }

    /// Delay after failed attempt `attempt` (1-indexed)
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base_delay = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let final_delay = if self.jitter {
            // 0.8 to 1.2
            capped_delay * (0.8 + rand_jitter() * 0.4)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0)
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    /// Transient, try again
    Retry,

    /// Permanent, fail now
    NoRetry,

    /// Rate limited; honour the server's delay when given
    RateLimited { retry_after_ms: Option<u64> },
}

/// Trait for errors that can be classified for retry
pub trait RetryableError {
    fn classify(&self) -> RetryClassification;
}

/// Run `operation` until it succeeds, fails permanently, or exhausts
/// `policy.max_attempts`
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let classification = e.classify();

                if classification == RetryClassification::NoRetry {
                    debug!(
                        "{}: non-retryable error on attempt {}: {}",
                        operation_name, attempt, e
                    );
                    return Err(e);
                }

                if attempt >= max_attempts {
                    warn!(
                        "{}: giving up after {} attempts: {}",
                        operation_name, attempt, e
                    );
                    return Err(e);
                }

                let delay = match classification {
                    RetryClassification::RateLimited {
                        retry_after_ms: Some(ms),
                    } => Duration::from_millis(ms),
                    _ => policy.delay_after_attempt(attempt),
                };

                warn!(
                    "{}: attempt {} failed, retrying in {:?}: {}",
                    operation_name, attempt, delay, e
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
