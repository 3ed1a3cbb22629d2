//! Retry with exponential backoff and jitter.
//!
//! A [`RetryPolicy`] is immutable once built. The [`RetryManager`] runs
//! blocking or async operations under a policy and keeps per-operation
//! counters. The backoff sleep is the only suspension point it adds.

use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rampart_core::{backoff, RetryConfig};

/// A failed attempt, as seen by a retry predicate.
pub struct AttemptFailure<'a> {
    error: &'a dyn Any,
    message: String,

    /// 0-indexed attempt that failed
    pub attempt: u32,
}

impl<'a> AttemptFailure<'a> {
    /// The error as a concrete type, if it is one.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    /// Rendered error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

type RetryPredicate = Arc<dyn Fn(&AttemptFailure<'_>) -> bool + Send + Sync>;

/// Backoff parameters plus an optional filter for retryable errors.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
    retry_on: Option<RetryPredicate>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("retry_on", &self.retry_on.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl RetryPolicy {
    /// Create a policy from backoff parameters.
    ///
    /// `max_attempts` is raised to 1 if zero: the operation always runs once.
    pub fn new(mut config: RetryConfig) -> Self {
        config.max_attempts = config.max_attempts.max(1);
        Self {
            config,
            retry_on: None,
        }
    }

    /// Only retry errors the predicate accepts; others are returned at once.
    pub fn with_retry_on<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&AttemptFailure<'_>) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    /// Only retry errors of type `E` that the predicate accepts.
    pub fn retry_if<E, P>(self, predicate: P) -> Self
    where
        E: Any,
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.with_retry_on(move |failure| failure.downcast_ref::<E>().is_some_and(&predicate))
    }

    /// Only retry errors whose message contains `needle` (case-insensitive).
    pub fn retry_on_message(self, needle: &str) -> Self {
        let needle = needle.to_lowercase();
        self.with_retry_on(move |failure| failure.message().to_lowercase().contains(&needle))
    }

    /// Backoff parameters.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total invocations allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether a failed attempt may be retried, ignoring the attempt budget.
    fn is_retryable<E: fmt::Display + 'static>(&self, error: &E, attempt: u32) -> bool {
        match &self.retry_on {
            None => true,
            Some(predicate) => predicate(&AttemptFailure {
                error,
                message: error.to_string(),
                attempt,
            }),
        }
    }

    /// Delay to sleep after the failed attempt `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let sample = if self.config.jitter {
            rand::thread_rng().gen::<f64>()
        } else {
            0.5
        };
        backoff::delay_for_attempt(&self.config, attempt, sample)
    }
}

/// Counters for one named operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    /// Every invocation of the operation
    pub total_attempts: u64,

    /// Calls that succeeded after at least one failed attempt
    pub successful_retries: u64,

    /// Calls that ran out of attempts
    pub failed_retries: u64,
}

/// What to do after a failed attempt.
enum Next {
    Sleep(Duration),
    GiveUp,
}

/// Runs operations under retry policies.
#[derive(Default)]
pub struct RetryManager {
    stats: RwLock<BTreeMap<String, RetryStats>>,
}

impl RetryManager {
    /// Create a manager with no recorded operations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a blocking operation, sleeping the thread between attempts.
    pub fn execute<T, E, F>(&self, operation: &str, policy: &RetryPolicy, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: fmt::Display + 'static,
    {
        let mut attempt = 0;
        loop {
            self.record(operation, |s| s.total_attempts += 1);
            match f() {
                Ok(value) => {
                    self.on_success(operation, attempt);
                    return Ok(value);
                }
                Err(err) => match self.on_error(operation, policy, attempt, &err) {
                    Next::Sleep(delay) => std::thread::sleep(delay),
                    Next::GiveUp => return Err(err),
                },
            }
            attempt += 1;
        }
    }

    /// Run an async operation, awaiting a timer between attempts.
    pub async fn execute_async<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display + 'static,
    {
        let mut attempt = 0;
        loop {
            self.record(operation, |s| s.total_attempts += 1);
            match f().await {
                Ok(value) => {
                    self.on_success(operation, attempt);
                    return Ok(value);
                }
                Err(err) => match self.on_error(operation, policy, attempt, &err) {
                    Next::Sleep(delay) => tokio::time::sleep(delay).await,
                    Next::GiveUp => return Err(err),
                },
            }
            attempt += 1;
        }
    }

    fn on_success(&self, operation: &str, attempt: u32) {
        if attempt > 0 {
            self.record(operation, |s| s.successful_retries += 1);
            tracing::info!(
                operation = %operation,
                attempts = attempt + 1,
                "Operation recovered after retry"
            );
        }
    }

    fn on_error<E: fmt::Display + 'static>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        attempt: u32,
        err: &E,
    ) -> Next {
        if !policy.is_retryable(err, attempt) {
            tracing::debug!(
                operation = %operation,
                error = %err,
                "Error is not retryable"
            );
            return Next::GiveUp;
        }

        if attempt + 1 >= policy.max_attempts() {
            self.record(operation, |s| s.failed_retries += 1);
            tracing::warn!(
                operation = %operation,
                attempts = attempt + 1,
                error = %err,
                "Retries exhausted"
            );
            return Next::GiveUp;
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::debug!(
            operation = %operation,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after backoff"
        );
        Next::Sleep(delay)
    }

    fn record(&self, operation: &str, update: impl FnOnce(&mut RetryStats)) {
        let mut stats = self.stats.write();
        update(stats.entry(operation.to_string()).or_default());
    }

    /// Counters for one operation.
    pub fn operation_stats(&self, operation: &str) -> RetryStats {
        self.stats.read().get(operation).cloned().unwrap_or_default()
    }

    /// Counters for all operations, ordered by name.
    pub fn stats(&self) -> BTreeMap<String, RetryStats> {
        self.stats.read().clone()
    }
}

/// A named operation bound to a policy and a manager.
///
/// This is the wrapper handed out to call sites: `call`/`call_async` accept
/// any closure and return its result or the last attempt's error.
#[derive(Clone)]
pub struct Retry {
    name: String,
    policy: RetryPolicy,
    manager: Arc<RetryManager>,
}

impl Retry {
    /// Bind a policy to an operation name.
    pub fn new(name: impl Into<String>, policy: RetryPolicy, manager: Arc<RetryManager>) -> Self {
        Self {
            name: name.into(),
            policy,
            manager,
        }
    }

    /// Operation name used for statistics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Policy applied to every call.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a blocking operation under the policy.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: fmt::Display + 'static,
    {
        self.manager.execute(&self.name, &self.policy, f)
    }

    /// Run an async operation under the policy.
    pub async fn call_async<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display + 'static,
    {
        self.manager.execute_async(&self.name, &self.policy, f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn policy(max_attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: false,
        })
    }

    #[test]
    fn test_always_failing_is_invoked_max_attempts_times() {
        let manager = RetryManager::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = manager.execute("flaky", &policy(4, 1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("failure {n}"))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.unwrap_err(), "failure 4");

        let stats = manager.operation_stats("flaky");
        assert_eq!(stats.total_attempts, 4);
        assert_eq!(stats.failed_retries, 1);
        assert_eq!(stats.successful_retries, 0);
    }

    #[test]
    fn test_succeeds_on_third_attempt() {
        let manager = RetryManager::new();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = manager.execute("answer", &policy(3, 10), || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("not yet")
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(30));

        let stats = manager.operation_stats("answer");
        assert_eq!(stats.successful_retries, 1);
        assert_eq!(stats.failed_retries, 0);
    }

    #[test]
    fn test_first_try_success_is_not_a_retry() {
        let manager = RetryManager::new();
        let result = manager.execute("fast", &policy(3, 1), || Ok::<_, String>("ok"));

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(manager.operation_stats("fast").successful_retries, 0);
        assert_eq!(manager.operation_stats("fast").total_attempts, 1);
    }

    #[test]
    fn test_non_retryable_error_returns_immediately() {
        let manager = RetryManager::new();
        let calls = AtomicU32::new(0);
        let policy = policy(5, 1).retry_if(|e: &io::Error| e.kind() == io::ErrorKind::TimedOut);

        let result: Result<(), io::Error> = manager.execute("io", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        });

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.operation_stats("io").failed_retries, 0);
    }

    #[test]
    fn test_retryable_error_is_retried() {
        let manager = RetryManager::new();
        let calls = AtomicU32::new(0);
        let policy = policy(3, 1).retry_on_message("timed out");

        let result: Result<(), String> = manager.execute("net", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("request Timed Out".to_string())
        });

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 0,
            ..Default::default()
        });
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_backoff_schedule() {
        let manager = RetryManager::new();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = tokio::time::Instant::now();

        let result = manager
            .execute_async("async", &policy(4, 100), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err("down")
                } else {
                    Ok("up")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "up");
        // 100ms + 200ms + 400ms of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(700));
        assert!(elapsed < Duration::from_millis(800));
        assert_eq!(manager.operation_stats("async").total_attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_exhaustion_returns_last_error() {
        let manager = Arc::new(RetryManager::new());
        let retry = Retry::new("wrapped", policy(2, 10), Arc::clone(&manager));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), String> = retry
            .call_async(move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("attempt {n}"))
            })
            .await;

        assert_eq!(result.unwrap_err(), "attempt 2");
        assert_eq!(manager.stats()["wrapped"].failed_retries, 1);
    }

    #[test]
    fn test_jittered_delay_within_band() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            jitter: true,
            ..Default::default()
        });

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(75));
            assert!(delay <= Duration::from_millis(125));
        }
    }
}
