//! Retry driver for worker dispatch.
//!
//! Transient failures (transport errors, HTTP 429 and 5xx) are re-dispatched
//! up to `max_retries` times with a linearly growing delay. Everything else is
//! returned after the first attempt. No lock is held across the sleeps; the
//! driver owns nothing but the schedule.

use std::future::Future;
use std::time::Duration;

use domain::{RetryPolicy, WorkerConfig, WorkerError};
use tracing::{debug, warn};

/// How often and how patiently to retry one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetrySchedule {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_delay(),
        }
    }

    /// Delay before retry number `attempt` (1-based): `base_delay * attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// The first attempt plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs `dispatch` until it succeeds, fails terminally, or the schedule is
/// exhausted.
///
/// `dispatch` receives the 1-based attempt number. Once every attempt has
/// failed with a retryable error the last error is wrapped in
/// [`WorkerError::RetriesExhausted`].
pub async fn run_with_retry<T, F, Fut>(
    schedule: RetrySchedule,
    worker: &str,
    mut dispatch: F,
) -> Result<T, WorkerError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, WorkerError>>,
{
    let max_attempts = schedule.max_attempts();
    let mut attempt = 1;
    loop {
        debug!(worker, attempt, max_attempts, "dispatching");
        let err = match dispatch(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let hinted = match err.retry_policy() {
            RetryPolicy::NonRetryable => return Err(err),
            RetryPolicy::Retryable { after } => after,
        };

        if attempt >= max_attempts {
            warn!(worker, attempts = attempt, error = %err, "retries exhausted");
            return Err(WorkerError::RetriesExhausted {
                worker: worker.to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = hinted
            .map_or(schedule.delay_for(attempt), |after| after.max(schedule.delay_for(attempt)));
        warn!(
            worker,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retryable failure, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn schedule(max_retries: u32) -> RetrySchedule {
        RetrySchedule {
            max_retries,
            base_delay: Duration::from_secs(2),
        }
    }

    fn transport() -> WorkerError {
        WorkerError::Transport {
            worker: "w".into(),
            message: "connection refused".into(),
            timed_out: false,
        }
    }

    #[test]
    fn delay_grows_linearly() {
        let s = schedule(3);
        assert_eq!(s.delay_for(1), Duration::from_secs(2));
        assert_eq!(s.delay_for(3), Duration::from_secs(6));
        assert_eq!(s.max_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_dispatch_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(schedule(3), "w", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WorkerError::invalid_input("topic", "required")) }
        })
        .await;
        assert!(matches!(result, Err(WorkerError::InvalidInput { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_use_every_attempt() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = run_with_retry(schedule(3), "w", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transport()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(WorkerError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(*last, transport());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // 2s + 4s + 6s of backoff.
        assert!(started.elapsed() >= Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let result = run_with_retry(schedule(3), "w", |attempt| async move {
            if attempt < 3 {
                Err(WorkerError::HttpStatus {
                    worker: "w".into(),
                    status: 503,
                    detail: None,
                })
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_still_wraps_the_failure() {
        let result: Result<(), _> = run_with_retry(schedule(0), "w", |_| async { Err(transport()) }).await;
        assert!(matches!(
            result,
            Err(WorkerError::RetriesExhausted { attempts: 1, .. })
        ));
    }
}
