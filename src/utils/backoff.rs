use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::warn;

use crate::config::BackoffPolicy;
use crate::errors::ClusterError;

/// Run a cluster operation with per-attempt timeout and exponential backoff.
///
/// Only transient failures (connection loss, attempt timeout) are retried.
/// Anything else surfaces immediately: a missing object stays missing no
/// matter how often we ask.
///
/// # Returns
/// The operation's value, the first non-transient error, or
/// [`ClusterError::RetriesExhausted`] wrapping the final transient failure.
pub async fn retry_cluster_op<F, Fut, T>(
    op: &'static str,
    policy: &BackoffPolicy,
    mut task: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let mut attempts = 0usize;
    let mut delay = policy.base_delay();

    loop {
        attempts += 1;
        let failure = match timeout(policy.timeout(), task()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => ClusterError::Timeout(policy.timeout()),
        };

        warn!(
            op,
            attempt = attempts,
            error = %failure,
            "transient cluster failure"
        );

        if attempts >= policy.max_retries {
            return Err(ClusterError::RetriesExhausted {
                attempts,
                last: Box::new(failure),
            });
        }

        sleep(with_jitter(delay)).await;
        delay = (delay * 2).min(policy.max_delay());
    }
}

/// Delay before reconnect attempt `attempt` (1-based), exponentially grown
/// from the policy base and capped at its maximum.
pub fn backoff_delay(
    policy: &BackoffPolicy,
    attempt: usize,
) -> Duration {
    // Cap the shift so the multiply cannot overflow
    let shift = attempt.saturating_sub(1).min(16) as u32;
    let raw = policy.base_delay_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(raw.min(policy.max_delay_ms))
}

/// Add up to 25% random jitter so parted clients do not reconnect in
/// lockstep.
pub fn with_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis < 4 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=millis / 4);
    Duration::from_millis(millis + jitter)
}
