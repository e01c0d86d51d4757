use std::time::Duration;

use rand::Rng;

/// An Exponential Backoff strategy that increases the delay exponentially with each retry.
///
/// The delay before retry `n` (1-based) is `base_interval * factor^(n - 1)`, jittered by
/// `±jitter` and always capped at `max_interval`. The iterator yields one delay per retry and
/// runs dry after `max_retries`, so an operation driven by it runs at most `max_retries + 1` times.
///
/// # Example
/// ```
/// use backoff::strategy::exponential::Exponential;
/// use std::time::Duration;
///
/// let mut backoff = Exponential::new(
///     Duration::from_millis(100), // base_interval
///     Duration::from_secs(10),    // max_interval
///     2.0,                        // factor
///     0.0,                        // jitter
///     Some(3),                    // max_retries
/// );
///
/// assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next(), Some(Duration::from_millis(400)));
/// assert_eq!(backoff.next(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Exponential {
    /// Delay before the first retry.
    base_interval: Duration,
    /// Upper bound for any single delay.
    max_interval: Duration,
    /// Growth factor between two consecutive delays.
    factor: f64,
    /// Jitter between 0.0 and 1.0.
    jitter: f64,
    /// Number of retries before the iterator is exhausted. None retries forever.
    max_retries: Option<usize>,
    /// Retries handed out so far.
    retries: usize,
}

impl Exponential {
    pub fn new(
        base_interval: Duration,
        max_interval: Duration,
        factor: f64,
        jitter: f64,
        max_retries: Option<usize>,
    ) -> Self {
        Self {
            base_interval,
            max_interval,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            max_retries,
            retries: 0,
        }
    }

    /// Builds the strategy for an operation allowed `max_attempts` runs in total, i.e. the first
    /// run plus `max_attempts - 1` retries.
    pub fn for_attempts(
        base_interval: Duration,
        max_interval: Duration,
        factor: f64,
        jitter: f64,
        max_attempts: usize,
    ) -> Self {
        Self::new(
            base_interval,
            max_interval,
            factor,
            jitter,
            Some(max_attempts.saturating_sub(1)),
        )
    }

    /// Retries handed out so far.
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Un-jittered delay for the given 1-based retry, capped at `max_interval`.
    pub fn nominal_delay(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry.max(1) - 1).unwrap_or(i32::MAX);
        let secs = self.base_interval.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    fn calculate_delay(&self, retry: usize) -> Duration {
        let delay = self.nominal_delay(retry);
        if self.jitter == 0.0 {
            return delay;
        }

        // 1.0 - jitter is the lower bound and 1.0 + jitter the upper bound
        let jitter_factor: f64 = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::try_from_secs_f64(delay.as_secs_f64() * jitter_factor)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

impl Iterator for Exponential {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(max_retries) = self.max_retries
            && self.retries >= max_retries
        {
            return None;
        }

        self.retries += 1;
        Some(self.calculate_delay(self.retries))
    }
}
