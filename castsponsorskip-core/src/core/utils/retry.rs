use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Classifies the error of a failed attempt for [retry].
#[derive(Debug, Clone, PartialEq)]
pub enum TryError<E> {
    /// The attempt failed and may be retried.
    Transient(E),
    /// The attempt failed and the remaining retries must be skipped.
    Halt(E),
}

impl<E> TryError<E> {
    /// Returns the underlying error of the attempt.
    pub fn into_inner(self) -> E {
        match self {
            TryError::Transient(e) => e,
            TryError::Halt(e) => e,
        }
    }
}

impl<E> From<E> for TryError<E> {
    fn from(value: E) -> Self {
        TryError::Transient(value)
    }
}

/// The error returned by [retry] when every attempt failed or the operation was cancelled.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetryError<E>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    #[error("{0}")]
    Inner(E),
    #[error("operation has been cancelled")]
    Cancelled,
}

impl<E> RetryError<E>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    /// Returns the underlying error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Inner(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

/// Execute the given operation up to `attempts` times with an exponential backoff.
///
/// The first attempt runs without any prior sleep. A [TryError::Halt] error skips the
/// remaining attempts and is returned immediately. Cancelling the given token while a
/// backoff sleep is pending aborts the retries with [RetryError::Cancelled].
pub async fn retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    attempts: u32,
    initial_sleep: Duration,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display + std::fmt::Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TryError<E>>>,
{
    assert!(attempts > 0, "attempts must be greater than 0");
    let mut sleep = initial_sleep;
    let mut last_error: Option<E> = None;

    for attempt in 0..attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(TryError::Halt(e)) => return Err(RetryError::Inner(e)),
            Err(TryError::Transient(e)) => last_error = Some(e),
        }

        if attempt + 1 < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = time::sleep(sleep) => sleep *= 2,
            }
        }
    }

    Err(RetryError::Inner(
        last_error.expect("expected at least one attempt to have failed"),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::init_logger;

    #[tokio::test]
    async fn test_retry_first_attempt_succeeds() {
        init_logger!();
        let cancel = CancellationToken::new();
        let invocations = AtomicU32::new(0);

        let result = retry(&cancel, 3, Duration::from_millis(1), |_| {
            invocations.fetch_add(1, Ordering::Relaxed);
            async { Ok::<_, TryError<String>>(42) }
        })
        .await;

        assert_eq!(Ok(42), result);
        assert_eq!(1, invocations.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        init_logger!();
        let cancel = CancellationToken::new();

        let result = retry(&cancel, 5, Duration::from_millis(1), |attempt| async move {
            if attempt < 2 {
                Err(TryError::from("try again".to_string()))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(Ok(2), result);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        init_logger!();
        let cancel = CancellationToken::new();
        let invocations = AtomicU32::new(0);

        let result: Result<(), _> = retry(&cancel, 3, Duration::from_millis(1), |_| {
            invocations.fetch_add(1, Ordering::Relaxed);
            async { Err(TryError::from("boom".to_string())) }
        })
        .await;

        assert_eq!(Err(RetryError::Inner("boom".to_string())), result);
        assert_eq!(3, invocations.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_retry_halt_skips_remaining_attempts() {
        init_logger!();
        let cancel = CancellationToken::new();
        let invocations = AtomicU32::new(0);

        let result: Result<(), _> = retry(&cancel, 10, Duration::from_millis(1), |_| {
            invocations.fetch_add(1, Ordering::Relaxed);
            async { Err(TryError::Halt("fatal".to_string())) }
        })
        .await;

        assert_eq!(Err(RetryError::Inner("fatal".to_string())), result);
        assert_eq!(1, invocations.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_retry_cancellation_aborts_backoff() {
        init_logger!();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = retry(&cancel, 3, Duration::from_secs(30), |_| async {
            Err(TryError::from("boom".to_string()))
        })
        .await;

        assert_eq!(Err(RetryError::Cancelled), result);
    }
}
