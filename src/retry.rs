//! Exponential backoff for transient transport failures.

use crate::error::MachineError;
use std::{future::Future, time::Duration};

/// Doubling backoff schedule with a hard cap and a bounded attempt count.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,

    /// Largest delay the schedule will ever produce.
    pub cap: Duration,

    /// Total attempts, including the first one.
    pub attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(8),
            attempts: 4,
        }
    }
}

impl BackoffPolicy {
    /// The delay to sleep after the given zero-based failed attempt:
    /// initial, doubled each time, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.cap)
    }
}

/// Run `op` until it succeeds, retrying transient failures on the policy's
/// schedule. Permanent failures, authentication rejections above all, are
/// returned on the spot without a retry.
pub async fn retry_transient<T, F, Fut>(
    policy: &BackoffPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, MachineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MachineError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use testresult::TestResult;

    #[test]
    fn schedule_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() -> TestResult {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result = retry_transient(&BackoffPolicy::default(), "open", move || {
            let calls = seen.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(MachineError::Connection("refused".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await?;
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failures_are_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result: Result<(), _> =
            retry_transient(&BackoffPolicy::default(), "open", move || {
                let calls = seen.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(MachineError::Auth("bad key".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(MachineError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let policy = BackoffPolicy {
            attempts: 3,
            ..BackoffPolicy::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result: Result<(), _> = retry_transient(&policy, "open", move || {
            let calls = seen.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MachineError::Timeout {
                    waited: Duration::from_secs(5),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(MachineError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
