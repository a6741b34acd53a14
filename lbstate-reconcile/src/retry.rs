//! Retry a mutation that a busy load balancer may reject
//!
//! Writes against a load balancer that is mid-transition fail with a conflict
//! until it settles. Transient failures are retried with exponential backoff
//! and jitter inside one shared budget; anything else fails at once.

use std::future::Future;
use std::time::Duration;

use lbstate_core::{ApiError, ApiResult};
use log::{debug, warn};
use rand::Rng;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::waiter::deadline_after;

/// Scale `delay` by a random factor in 0.5x..1.5x
fn jittered(delay: Duration, jitter: bool) -> Duration {
    if !jitter {
        return delay;
    }
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
}

/// Run `operation` until it succeeds, fails fatally, or `timeout` runs out
///
/// Errors for which [`ApiError::is_transient`] holds are retried. Once the
/// budget cannot fit another attempt, the last transient error is returned as
/// [`ReconcileError::TransientConflict`]. Cancellation interrupts both an
/// attempt in flight and the pause between attempts.
pub async fn retry_mutation<T, F, Fut>(
    cancel: &CancellationToken,
    timeout: Duration,
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> ReconcileResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let deadline = deadline_after(timeout);
    let cancelled = || ReconcileError::Cancelled {
        operation: operation_name.to_string(),
    };
    let exhausted = |attempts: u32, last: Option<ApiError>| match last {
        Some(source) => ReconcileError::TransientConflict {
            operation: operation_name.to_string(),
            attempts,
            source,
        },
        None => ReconcileError::MutationTimeout {
            operation: operation_name.to_string(),
            timeout,
        },
    };

    let mut attempts = 0u32;
    let mut delay = config.initial_delay;
    let mut last_error: Option<ApiError> = None;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = sleep_until(deadline) => return Err(exhausted(attempts, last_error)),
            result = operation() => result,
        };
        attempts += 1;

        let err = match result {
            Ok(value) => {
                if attempts > 1 {
                    debug!("{} succeeded after {} attempts", operation_name, attempts);
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => {
                return Err(ReconcileError::Fatal {
                    operation: operation_name.to_string(),
                    source: err,
                });
            }
            Err(err) => err,
        };

        let pause = jittered(delay, config.jitter);
        if Instant::now()
            .checked_add(pause)
            .is_none_or(|resumed| resumed >= deadline)
        {
            return Err(exhausted(attempts, Some(err)));
        }
        warn!(
            "{} failed (attempt {}): {}; retrying in {:?}",
            operation_name, attempts, err, pause
        );
        last_error = Some(err);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = sleep(pause) => {}
        }
        delay = config.next_delay(delay);
    }
}
