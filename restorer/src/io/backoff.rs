//! Exponential backoff with jitter for transient external-call failures.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::warn;

/// Retry policy for transient failures (network hiccups, flaky subprocesses).
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub exp_base: u32,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(3),
            exp_base: 2,
            jitter: true,
        }
    }
}

/// Run `op`, retrying transient failures with exponentially growing, jittered
/// delays. The last error is returned once the retry budget is exhausted.
pub fn retry_with_backoff<T, F>(
    policy: &BackoffPolicy,
    rng: &mut StdRng,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    return Err(err.context(format!(
                        "{label} failed after {} retries",
                        policy.max_retries
                    )));
                }
                warn!(%label, attempt, delay_ms = delay.as_millis() as u64, err = %err, "transient failure, backing off");
                thread::sleep(delay);
                let mut scale = policy.exp_base as f64;
                if policy.jitter {
                    scale *= 1.0 + rng.r#gen::<f64>();
                }
                delay = delay.mul_f64(scale);
            }
        }
    }
}
