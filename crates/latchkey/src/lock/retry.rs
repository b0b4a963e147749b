//! Exponential backoff around a single-shot lock attempt.

use std::time::Duration;

use async_trait::async_trait;
use latchkey_core::LockError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// First retry delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on one retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// A lock primitive that can be attempted without waiting.
#[async_trait]
pub trait TryLock: Send {
    fn key(&self) -> &str;

    /// One non-blocking attempt. `Ok(false)` means someone else holds it.
    async fn try_lock(&mut self, lease: Duration) -> Result<bool, LockError>;
}

/// Retries a [`TryLock`] with doubling delays until it succeeds or the wait budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY)
    }
}

impl RetryBackoff {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: DEFAULT_MAX_DELAY.max(base_delay),
        }
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.base_delay);
        self
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Attempts `lock` until it is acquired or `max_wait` has elapsed.
    ///
    /// At least one attempt is always made. Sleeps never run past the
    /// deadline, so the call returns within `max_wait` plus one attempt.
    /// Cancelling `cancel` aborts the wait with [`LockError::Cancelled`].
    pub async fn acquire<L: TryLock + ?Sized>(
        &self,
        lock: &mut L,
        max_wait: Duration,
        lease: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, LockError> {
        let started = Instant::now();
        let mut delay = self.base_delay;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(LockError::cancelled(lock.key()));
            }

            attempt += 1;
            if lock.try_lock(lease).await? {
                debug!(key = %lock.key(), attempt, "Lock acquired");
                return Ok(true);
            }

            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                debug!(key = %lock.key(), attempt, elapsed_ms = elapsed.as_millis() as u64, "Lock wait budget exhausted");
                return Ok(false);
            }

            let sleep_for = delay.min(max_wait - elapsed);
            info!(
                key = %lock.key(),
                attempt,
                delay_ms = sleep_for.as_millis() as u64,
                "Lock acquisition failed, retrying after backoff"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LockError::cancelled(lock.key())),
                _ = tokio::time::sleep(sleep_for) => {}
            }

            delay = delay.saturating_mul(2).min(self.max_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Succeeds on the given attempt number (never if `None`), recording when each attempt ran.
    struct Scripted {
        succeed_on: Option<usize>,
        attempts: Vec<Duration>,
        started: Instant,
    }

    impl Scripted {
        fn new(succeed_on: Option<usize>) -> Self {
            Self {
                succeed_on,
                attempts: Vec::new(),
                started: Instant::now(),
            }
        }
    }

    #[async_trait]
    impl TryLock for Scripted {
        fn key(&self) -> &str {
            "test:key"
        }

        async fn try_lock(&mut self, _lease: Duration) -> Result<bool, LockError> {
            self.attempts.push(self.started.elapsed());
            Ok(self.succeed_on == Some(self.attempts.len()))
        }
    }

    const LEASE: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let mut lock = Scripted::new(Some(1));
        let acquired = RetryBackoff::default()
            .acquire(&mut lock, Duration::from_secs(1), LEASE, &CancellationToken::new())
            .await
            .unwrap();
        assert!(acquired);
        assert_eq!(lock.attempts, vec![Duration::ZERO]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_double_and_respect_deadline() {
        let mut lock = Scripted::new(None);
        let acquired = RetryBackoff::default()
            .acquire(&mut lock, Duration::from_millis(1000), LEASE, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!acquired);
        let millis: Vec<u128> = lock.attempts.iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![0, 100, 300, 700, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retries() {
        let mut lock = Scripted::new(Some(3));
        let started = Instant::now();
        let acquired = RetryBackoff::default()
            .acquire(&mut lock, Duration::from_secs(1), LEASE, &CancellationToken::new())
            .await
            .unwrap();
        assert!(acquired);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_makes_one_attempt() {
        let mut lock = Scripted::new(None);
        let acquired = RetryBackoff::default()
            .acquire(&mut lock, Duration::ZERO, LEASE, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!acquired);
        assert_eq!(lock.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_delay_caps_growth() {
        let mut lock = Scripted::new(None);
        let backoff = RetryBackoff::new(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(200));
        backoff
            .acquire(&mut lock, Duration::from_millis(700), LEASE, &CancellationToken::new())
            .await
            .unwrap();
        let millis: Vec<u128> = lock.attempts.iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![0, 100, 300, 500, 700]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_sleep() {
        let mut lock = Scripted::new(None);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let err = RetryBackoff::default()
            .acquire(&mut lock, Duration::from_secs(10), LEASE, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Cancelled { ref key } if key == "test:key"));
        assert_eq!(lock.attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled() {
        let mut lock = Scripted::new(Some(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = RetryBackoff::default()
            .acquire(&mut lock, Duration::from_secs(1), LEASE, &cancel)
            .await;
        assert!(result.is_err());
        assert!(lock.attempts.is_empty());
    }
}
