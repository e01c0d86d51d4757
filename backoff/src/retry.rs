use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{Condition, Operation};

/// Why a [`Retry`] gave up. Every variant carries the number of times the [`Operation`] ran.
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// The backoff strategy ran dry; `error` is the last error returned by the operation.
    Exhausted { attempts: usize, error: E },
    /// The [`Condition`] refused to retry `error`.
    Aborted { attempts: usize, error: E },
    /// The cancellation token fired before the next attempt. `error` is the last error, if the
    /// operation ran at all.
    Cancelled { attempts: usize, error: Option<E> },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, error } => {
                write!(f, "retries exhausted after {attempts} attempts: {error}")
            }
            RetryError::Aborted { attempts, error } => {
                write!(f, "non-retryable error on attempt {attempts}: {error}")
            }
            RetryError::Cancelled {
                attempts,
                error: Some(error),
            } => write!(f, "cancelled after {attempts} attempts: {error}"),
            RetryError::Cancelled { attempts, error: None } => {
                write!(f, "cancelled after {attempts} attempts")
            }
        }
    }
}

/// Retry runs an [`Operation`] until it succeeds, the [`Condition`] rejects its error, the backoff
/// runs dry, or the [`CancellationToken`] is cancelled.
///
/// ```no_rust
///                (Ok) -> [Return(Ok)]
///               /
/// [cancelled?] -> (op)         (Non-retryable) -> [Aborted]
///   \           \             /
///   [Cancelled]  (Err) -------              (None) -> [Exhausted]
///                             \            /
///                              (Retryable) -> (Backoff)
///                                                \
///                                                 (Sleep | Cancel) -> [Cancelled]
///                                                   \
///                                                    [START(op)]
/// ```
///
/// A cancellation never interrupts an attempt that is already running, it only prevents the next
/// one from starting.
pub struct Retry<I, O, C> {
    backoff: I,
    operation: O,
    condition: C,
    cancel: CancellationToken,
}

impl<I, O, C> Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    pub fn new<II: IntoIterator<IntoIter = I, Item = I::Item>>(
        backoff: II,
        operation: O,
        condition: C,
    ) -> Self {
        Self {
            backoff: backoff.into_iter(),
            operation,
            condition,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop retrying as soon as `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(mut self) -> Result<O::Item, RetryError<O::Error>> {
        if self.cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: 0,
                error: None,
            });
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.operation.run().await {
                Ok(item) => return Ok(item),
                Err(error) => error,
            };

            if !self.condition.can_retry(&error) {
                return Err(RetryError::Aborted { attempts, error });
            }

            let Some(delay) = self.backoff.next() else {
                return Err(RetryError::Exhausted { attempts, error });
            };

            // cool off, unless we are asked to stop
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(RetryError::Cancelled {
                        attempts,
                        error: Some(error),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::strategy::exponential::Exponential;

    fn fixed(millis: u64, retries: Option<usize>) -> Exponential {
        Exponential::new(
            Duration::from_millis(millis),
            Duration::from_millis(millis),
            1.0,
            0.0,
            retries,
        )
    }

    async fn always_successful() -> Result<u64, ()> {
        Ok(42)
    }

    fn true_cond<E>(_: &E) -> bool {
        true
    }

    fn false_cond<E>(_: &E) -> bool {
        false
    }

    #[tokio::test]
    async fn successful_first_attempt() {
        let result = Retry::new(fixed(1, None), always_successful, |_: &()| true)
            .run()
            .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn non_retriable_failure() {
        let result = Retry::new(
            fixed(1, None),
            || future::ready(Err::<(), &str>("err")),
            false_cond,
        )
        .run()
        .await;
        assert_eq!(
            result,
            Err(RetryError::Aborted {
                attempts: 1,
                error: "err"
            })
        );
    }

    #[tokio::test]
    async fn retry_till_condition() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cloned_counter = Arc::clone(&counter);

        let result = Retry::new(
            fixed(1, Some(10)),
            move || {
                let previous = cloned_counter.fetch_add(1, Ordering::SeqCst);
                future::ready(Err::<(), usize>(previous + 1))
            },
            |e: &usize| *e < 3,
        )
        .run()
        .await;

        assert_eq!(
            result,
            Err(RetryError::Aborted {
                attempts: 3,
                error: 3
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_till_exhaustion() {
        let retries = 5;
        let counter = Arc::new(AtomicUsize::new(0));
        let cloned_counter = Arc::clone(&counter);

        let result = Retry::new(
            fixed(1, Some(retries)),
            move || {
                let previous = cloned_counter.fetch_add(1, Ordering::SeqCst);
                future::ready(Err::<(), usize>(previous + 1))
            },
            true_cond,
        )
        .run()
        .await;

        // + 1 because the first run is not a retry
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: retries + 1,
                error: retries + 1
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), retries + 1);
    }

    #[tokio::test]
    async fn succeeds_after_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cloned_counter = Arc::clone(&counter);

        let result = Retry::new(
            fixed(1, Some(2)),
            move || {
                let previous = cloned_counter.fetch_add(1, Ordering::SeqCst);
                future::ready(if previous < 2 { Err(()) } else { Ok(previous) })
            },
            true_cond,
        )
        .run()
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retrying() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cloned_counter = Arc::clone(&counter);
        let cancel = CancellationToken::new();

        let retry = Retry::new(
            fixed(60_000, None),
            move || {
                cloned_counter.fetch_add(1, Ordering::SeqCst);
                future::ready(Err::<(), &str>("down"))
            },
            true_cond,
        )
        .with_cancellation(cancel.clone());

        let handle = tokio::spawn(retry.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert_eq!(
            result,
            Err(RetryError::Cancelled {
                attempts: 1,
                error: Some("down")
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = Retry::new(fixed(1, None), always_successful, |_: &()| true)
            .with_cancellation(cancel)
            .run()
            .await;
        assert_eq!(
            result,
            Err(RetryError::Cancelled {
                attempts: 0,
                error: None
            })
        );
    }
}
