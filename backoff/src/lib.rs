//! Retry with backoff for async Rust.
//!
//! Given an [`Operation`], we run it to completion. If it returns an error, we retry it after a
//! cool-off period prescribed by a backoff [`strategy`]. Retrying is not always useful, the
//! [`Condition`] decides whether an error is worth another attempt. The cool-off can be cut short
//! by a [`CancellationToken`](tokio_util::sync::CancellationToken), in which case no further attempt
//! is made.
//!
//! ```rust
//! use backoff::retry::Retry;
//! use backoff::strategy::exponential::Exponential;
//! use std::time::Duration;
//!
//! async fn some_work() -> Result<u64, ()> {
//!     Ok(42)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let backoff = Exponential::new(
//!         Duration::from_millis(1),
//!         Duration::from_millis(10),
//!         2.0,
//!         0.0,
//!         Some(3),
//!     );
//!     let result = Retry::new(backoff, some_work, |_: &()| true).run().await;
//!     assert_eq!(result.unwrap(), 42);
//! }
//! ```

use std::future::Future;

/// strategy has the backoff strategies. Each one is an iterator with Item=Duration, the
/// iterator running dry means we are out of retries.
pub mod strategy;

/// Conditional, cancellable retry till we run out of backoff.
pub mod retry;

/// The retry condition depends on the result of [`Condition::can_retry`] function.
/// [`Condition::can_retry`] should return `true` to continue retrying or `false` to stop.
pub trait Condition<E> {
    fn can_retry(&self, error: &E) -> bool;
}

/// a fn pointer (Fn) can be passed which returns bool based on the error
impl<E, F> Condition<E> for F
where
    F: Fn(&E) -> bool,
{
    fn can_retry(&self, error: &E) -> bool {
        self(error)
    }
}

/// An `Operation` is anything that returns a Future when executed and that
/// Future can be run to completion.
pub trait Operation {
    type Item;
    type Error;
    /// The [`Future`] returned when the Operation is called.
    type Future: Future<Output = Result<Self::Item, Self::Error>>;

    #[must_use = "futures do nothing unless you `.await` or poll them"]
    fn run(&mut self) -> Self::Future;
}

/// [`FnMut`] returning a [`Future`] whose output is a [`Result`] is an [`Operation`].
impl<T, E, R, F> Operation for F
where
    R: Future<Output = Result<T, E>>,
    F: FnMut() -> R,
{
    type Item = T;
    type Error = E;
    type Future = R;

    fn run(&mut self) -> Self::Future {
        self()
    }
}
