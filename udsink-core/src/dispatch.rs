//! Delivery of an [OutboundUnit] with bounded, cancellable retries.

use std::sync::Arc;
use std::time::Instant;

use backoff::retry::{Retry, RetryError};
use backoff::strategy::exponential::Exponential;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::Error;
use crate::aggregate::OutboundUnit;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::metrics::SinkMetrics;

pub mod http;
pub mod pushgateway;
pub mod workflow;

/// A downstream system the outbound unit is delivered to. One call is one attempt.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Delivers the unit. [Error::Transport] is worth retrying, anything else is final.
    async fn deliver(&self, unit: &OutboundUnit) -> Result<()>;
}

/// How a batch delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// Retrying was cut short by cancellation, the same batch may succeed later.
    FailureRetryable,
    FailurePermanent,
    /// Attempts were exhausted and the drop policy acknowledged the batch anyway.
    Dropped,
}

/// Drives a [Transport] under the retry policy.
pub struct Dispatcher<T> {
    transport: T,
    retry: RetryConfig,
    metrics: Arc<SinkMetrics>,
}

impl<T: Transport + Sync> Dispatcher<T> {
    pub fn new(transport: T, retry: RetryConfig, metrics: Arc<SinkMetrics>) -> Self {
        Self {
            transport,
            retry,
            metrics,
        }
    }

    /// Delivers `unit`, retrying transport errors with exponential backoff until attempts run
    /// out. `cancel` stops any further attempt, the one in flight is not interrupted.
    pub async fn dispatch(&self, unit: &OutboundUnit, cancel: &CancellationToken) -> DeliveryOutcome {
        self.metrics.request_size.observe(unit.size() as f64);

        let backoff = Exponential::for_attempts(
            self.retry.initial_backoff,
            self.retry.max_backoff,
            self.retry.factor,
            self.retry.jitter,
            self.retry.max_attempts,
        );

        let transport = &self.transport;
        let metrics = &self.metrics;
        let max_attempts = self.retry.max_attempts;
        let mut attempt = 0;
        let operation = move || {
            attempt += 1;
            let attempt = attempt;
            async move {
                let start = Instant::now();
                let result = transport.deliver(unit).await;
                metrics.request_total.inc();
                metrics
                    .request_latency
                    .observe(start.elapsed().as_micros() as f64);
                if let Err(e) = &result {
                    warn!(attempt, max_attempts, error = %e, "Delivery attempt failed");
                }
                result
            }
        };

        let result = Retry::new(backoff, operation, |e: &Error| e.is_retryable())
            .with_cancellation(cancel.clone())
            .run()
            .await;

        match result {
            Ok(()) => {
                info!(records = unit.len(), "Delivered");
                self.metrics.success_total.inc();
                DeliveryOutcome::Success
            }
            Err(RetryError::Exhausted { attempts, error }) if self.retry.drop_on_exhaustion => {
                warn!(attempts, error = %error, records = unit.len(), "Retries exhausted, dropping");
                self.metrics.dropped_total.inc();
                DeliveryOutcome::Dropped
            }
            Err(RetryError::Exhausted { attempts, error }) => {
                error!(attempts, error = %error, "Retries exhausted");
                self.metrics.failed_total.inc();
                DeliveryOutcome::FailurePermanent
            }
            Err(RetryError::Aborted { attempts, error }) => {
                error!(attempts, error = %error, "Delivery rejected");
                self.metrics.failed_total.inc();
                DeliveryOutcome::FailurePermanent
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                warn!(attempts, "Cancelled while retrying");
                self.metrics.failed_total.inc();
                DeliveryOutcome::FailureRetryable
            }
        }
    }
}
