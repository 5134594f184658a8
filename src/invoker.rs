//! Fallback-capable invoker
//!
//! Runs an operation against an ordered list of endpoints (model identifiers,
//! or a single search provider) until one succeeds:
//!
//! ```text
//!   endpoint A ──transient──▶ backoff ──▶ A ──transient──▶ ... (max_attempts)
//!        │                                         │
//!     permanent                                exhausted
//!        ▼                                         ▼
//!   endpoint B ──────────────── ok ───────────▶ return
//!        │
//!       ...
//!        ▼
//!   AllEndpointsExhausted { one failure per endpoint, in order }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{CapabilityError, EndpointFailure, InvokeError};

/// Retry policy applied to each endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per endpoint, including the first one
    pub max_attempts: usize,

    /// Base delay for exponential backoff
    pub backoff_base: Duration,

    /// Maximum delay between attempts
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given number of attempts per endpoint
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Set backoff base duration
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set maximum backoff duration
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    /// A single attempt per endpoint
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let multiplier = 2u32.saturating_pow(retry.min(u32::MAX as usize) as u32);
        self.backoff_base.saturating_mul(multiplier).min(self.backoff_max)
    }

    /// Check if another attempt is allowed after `attempts` attempts
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts.max(1)
    }
}

/// Tries endpoints in priority order with per-endpoint retry.
#[derive(Debug, Clone, Default)]
pub struct FallbackInvoker {
    policy: RetryPolicy,
}

impl FallbackInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Invoke `operation` against `endpoints` in order.
    ///
    /// Transient errors are retried on the same endpoint with exponential
    /// backoff; a permanent error moves on to the next endpoint at once. The
    /// first success is returned. The operation may run several times and must
    /// be safe to repeat.
    pub async fn invoke<T, E, F, Fut>(
        &self,
        endpoints: &[String],
        mut operation: F,
    ) -> Result<T, InvokeError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<CapabilityError>,
    {
        if endpoints.is_empty() {
            return Err(InvokeError::NoEndpoints);
        }

        let mut failures = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let mut attempts = 0;

            let last_error = loop {
                attempts += 1;
                debug!(endpoint = %endpoint, attempt = attempts, "Invoking endpoint");

                let outcome: Result<T, CapabilityError> =
                    operation(endpoint.clone()).await.map_err(Into::into);

                match outcome {
                    Ok(value) => {
                        if attempts > 1 || !failures.is_empty() {
                            info!(
                                endpoint = %endpoint,
                                attempt = attempts,
                                failed_endpoints = failures.len(),
                                "Endpoint succeeded after earlier failures"
                            );
                        }
                        return Ok(value);
                    }
                    Err(error) if error.is_transient() && self.policy.should_retry(attempts) => {
                        let delay = self.policy.delay_for_retry(attempts - 1);
                        warn!(
                            endpoint = %endpoint,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Transient failure, will retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(error) => break error,
                }
            };

            warn!(
                endpoint = %endpoint,
                attempts,
                error = %last_error,
                "Giving up on endpoint"
            );
            failures.push(EndpointFailure {
                endpoint: endpoint.clone(),
                attempts,
                error: last_error,
            });
        }

        Err(InvokeError::AllEndpointsExhausted { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn endpoints(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_backoff_base(Duration::ZERO)
    }

    /// Records how often each endpoint was called
    #[derive(Default)]
    struct CallLog {
        calls: Mutex<HashMap<String, usize>>,
    }

    impl CallLog {
        fn hit(&self, endpoint: &str) -> usize {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(endpoint.to_string()).or_insert(0);
            *count += 1;
            *count
        }

        fn count(&self, endpoint: &str) -> usize {
            self.calls.lock().unwrap().get(endpoint).copied().unwrap_or(0)
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_retry_backoff() {
        let policy = RetryPolicy::default().with_backoff_base(Duration::from_millis(100));

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_backoff_max() {
        let policy = RetryPolicy::default()
            .with_backoff_base(Duration::from_millis(100))
            .with_backoff_max(Duration::from_millis(300));

        assert_eq!(policy.delay_for_retry(10), Duration::from_millis(300));
        assert_eq!(policy.delay_for_retry(64), Duration::from_millis(300));
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(1));
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_moves_to_next_endpoint() {
        let log = CallLog::default();
        let invoker = FallbackInvoker::new(fast_policy(3));

        let result = invoker
            .invoke(&endpoints(&["a", "b"]), |endpoint| {
                log.hit(&endpoint);
                async move {
                    if endpoint == "a" {
                        Err(GenerationError::permanent("unauthorized"))
                    } else {
                        Ok("from b".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("from b".to_string()));
        assert_eq!(log.count("a"), 1);
        assert_eq!(log.count("b"), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let log = CallLog::default();
        let invoker = FallbackInvoker::new(fast_policy(3));

        let result = invoker
            .invoke(&endpoints(&["a"]), |endpoint| {
                let call = log.hit(&endpoint);
                async move {
                    if call <= 2 {
                        Err(GenerationError::transient("503 Service Unavailable"))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(log.count("a"), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_each_endpoint_in_order() {
        let log = CallLog::default();
        let invoker = FallbackInvoker::new(fast_policy(2));

        let result: Result<String, _> = invoker
            .invoke(&endpoints(&["a", "b", "c"]), |endpoint| {
                log.hit(&endpoint);
                async move {
                    match endpoint.as_str() {
                        "b" => Err(GenerationError::permanent("bad request")),
                        _ => Err(GenerationError::transient(format!("{endpoint} timed out"))),
                    }
                }
            })
            .await;

        let err = result.unwrap_err();
        let failures = err.failures();
        assert!(matches!(err, InvokeError::AllEndpointsExhausted { .. }));
        assert_eq!(failures.len(), 3);
        assert_eq!(
            failures.iter().map(|f| f.endpoint.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(failures[0].attempts, 2);
        assert_eq!(failures[1].attempts, 1);
        assert_eq!(failures[1].error, CapabilityError::Permanent("bad request".to_string()));
        assert_eq!(failures[2].error, CapabilityError::Transient("c timed out".to_string()));
        assert_eq!(log.count("a"), 2);
        assert_eq!(log.count("b"), 1);
        assert_eq!(log.count("c"), 2);
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let log = CallLog::default();
        let invoker = FallbackInvoker::default();

        let result = invoker
            .invoke(&endpoints(&["a", "b"]), |endpoint| {
                log.hit(&endpoint);
                async move { Ok::<_, GenerationError>(endpoint) }
            })
            .await;

        assert_eq!(result, Ok("a".to_string()));
        assert_eq!(log.count("b"), 0);
    }

    #[tokio::test]
    async fn test_empty_endpoint_list() {
        let invoker = FallbackInvoker::default();
        let result = invoker
            .invoke(&[], |_| async { Ok::<_, GenerationError>(()) })
            .await;
        assert_eq!(result, Err(InvokeError::NoEndpoints));
    }

    #[tokio::test]
    async fn test_backoff_waits_between_attempts() {
        let invoker = FallbackInvoker::new(
            RetryPolicy::new(2).with_backoff_base(Duration::from_millis(50)),
        );
        let log = CallLog::default();

        let started = std::time::Instant::now();
        let _ = invoker
            .invoke(&endpoints(&["a"]), |endpoint| {
                log.hit(&endpoint);
                async { Err::<(), _>(GenerationError::transient("rate limited")) }
            })
            .await;

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(log.count("a"), 2);
    }
}
