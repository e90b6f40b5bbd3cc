//! Dial retry policy: exponential backoff, 5 attempts, 100 ms starting
//! delay.

use std::future::Future;
use std::time::Duration;

use relay_core::error::CoreError;
use relay_core::observability::{OpsEvent, OpsEventBus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DialRetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for DialRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
        }
    }
}

impl DialRetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Retries `dial` up to `policy.max_attempts` times with exponential
/// backoff, emitting a [`OpsEvent::DialRetry`] on every retry so an
/// operator can see dial flakiness without combing through logs.
pub async fn dial_with_retry<T, F, Fut>(
    destination_label: &str,
    policy: DialRetryPolicy,
    ops_bus: Option<&dyn OpsEventBus>,
    mut dial: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut last_err = None;
    for attempt in 0..policy.max_attempts {
        match dial().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                if attempt + 1 < policy.max_attempts {
                    if let Some(bus) = ops_bus {
                        bus.broadcast(OpsEvent::DialRetry {
                            destination: destination_label.to_string(),
                            attempt: attempt + 1,
                        });
                    }
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("loop runs at least once since max_attempts >= 1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::error::{codes, ErrorCategory};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = DialRetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
        };
        let result = dial_with_retry::<(), _, _>("test", policy, None, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CoreError::new(codes::TRANSPORT_DIAL_REFUSED, ErrorCategory::Network, "refused"))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = DialRetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
        };
        let result = dial_with_retry::<(), _, _>("test", policy, None, || async {
            Err(CoreError::new(codes::TRANSPORT_DIAL_REFUSED, ErrorCategory::Network, "refused"))
        })
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        let policy = DialRetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }
}
