//! Retry with linear backoff

use std::future::Future;

use tracing::{info, warn};

use crate::errors::EngineError;
use crate::exec::runner::ExecutionResult;
use crate::models::script::RetryPolicy;
use crate::utils::{calc_linear_backoff, BackoffOptions};

/// Run `action` until it succeeds or the policy's attempts are used up.
///
/// `action` receives the 1-based attempt number. Before retry `n` the
/// controller waits `min(n * step, max_delay)`. An `Err` from `action` is a
/// hard failure (e.g. the process could not be spawned) and is returned
/// immediately without further attempts.
pub async fn run_with_retry<F, Fut>(
    policy: RetryPolicy,
    backoff: &BackoffOptions,
    label: &str,
    mut action: F,
) -> Result<ExecutionResult, EngineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ExecutionResult, EngineError>>,
{
    let total = policy.total_attempts();
    let mut attempt = 1;

    loop {
        let mut result = action(attempt).await?;
        result.attempts = attempt;

        if result.success {
            if attempt > 1 {
                info!("{} succeeded on attempt {}/{}", label, attempt, total);
            }
            return Ok(result);
        }

        if attempt >= total {
            result.retry_exhausted = policy.enabled;
            if policy.enabled {
                warn!("{} failed after {} attempts", label, attempt);
            }
            return Ok(result);
        }

        let delay = calc_linear_backoff(backoff, attempt);
        warn!(
            "{} failed (attempt {}/{}), retrying in {:?}",
            label, attempt, total, delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn outcome(success: bool) -> Result<ExecutionResult, EngineError> {
        Ok(ExecutionResult {
            success,
            exit_code: Some(if success { 0 } else { 1 }),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_wait_linear_backoff() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = run_with_retry(
            RetryPolicy::attempts(3),
            &BackoffOptions::default(),
            "always fails",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { outcome(false) }
            },
        )
        .await
        .unwrap();

        let waited = started.elapsed();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.attempts, 3);
        assert!(result.retry_exhausted);
        assert!(waited >= Duration::from_secs(15));
        assert!(waited < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let result = run_with_retry(
            RetryPolicy::attempts(5),
            &BackoffOptions::default(),
            "flaky",
            |attempt| async move { outcome(attempt == 2) },
        )
        .await
        .unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert!(!result.retry_exhausted);
    }

    #[tokio::test]
    async fn test_disabled_policy_runs_once() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(
            RetryPolicy::disabled(),
            &BackoffOptions::default(),
            "once",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { outcome(false) }
            },
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!result.success);
        assert!(!result.retry_exhausted);
    }

    #[tokio::test]
    async fn test_hard_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(
            RetryPolicy::attempts(3),
            &BackoffOptions::default(),
            "spawn",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Internal("cannot spawn".to_string())) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
