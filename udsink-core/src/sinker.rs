//! The delivery pipeline of one batch and its adapter onto the numaflow sink server.
//!
//! A batch flows through dedup, aggregation and a single dispatch, then every record gets exactly
//! one response. Duplicates are answered OK without being sent.

use std::sync::Arc;
use std::time::Duration;

use numaflow::sink;
use numaflow::sink::SinkRequest;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::Aggregator;
use crate::dedup::KeyExtractor;
use crate::dedup::cache::DedupCache;
use crate::dispatch::{DeliveryOutcome, Dispatcher, Transport};
use crate::message::Record;
use crate::metrics::SinkMetrics;
use crate::reconcile::{Response, reconcile};

/// Handles one inbound batch. `cancel` fires on shutdown or when the batch deadline passes.
#[trait_variant::make(Sink: Send)]
pub trait LocalSink {
    /// Returns exactly one response per record, in record order.
    async fn handle(&self, batch: Vec<Record>, cancel: CancellationToken) -> Vec<Response>;
}

struct Dedup {
    extractor: KeyExtractor,
    cache: DedupCache,
}

/// Dedup, aggregate, dispatch and reconcile, with the flavor plugged in as the [Aggregator] and
/// the [Transport].
pub struct DeliverySink<T> {
    dedup: Option<Dedup>,
    aggregator: Aggregator,
    dispatcher: Dispatcher<T>,
    failure_message: String,
    read_interval: Duration,
    metrics: Arc<SinkMetrics>,
}

impl<T: Transport + Sync> DeliverySink<T> {
    pub fn new(
        aggregator: Aggregator,
        dispatcher: Dispatcher<T>,
        failure_message: impl Into<String>,
        metrics: Arc<SinkMetrics>,
    ) -> Self {
        Self {
            dedup: None,
            aggregator,
            dispatcher,
            failure_message: failure_message.into(),
            read_interval: Duration::ZERO,
            metrics,
        }
    }

    pub fn with_dedup(mut self, extractor: KeyExtractor, cache: DedupCache) -> Self {
        self.dedup = Some(Dedup { extractor, cache });
        self
    }

    /// Pause after every successful delivery.
    pub fn with_read_interval(mut self, read_interval: Duration) -> Self {
        self.read_interval = read_interval;
        self
    }

    /// Records the key of `record` and tells whether it was seen within the TTL. A record whose
    /// key cannot be extracted bypasses dedup.
    fn is_duplicate(&self, record: &Record) -> bool {
        let Some(dedup) = &self.dedup else {
            return false;
        };

        match dedup.extractor.extract(&record.payload) {
            Ok(Some(key)) => {
                let duplicate = dedup.cache.check_and_record(&key);
                if duplicate {
                    self.metrics.duplicate_total.inc();
                    debug!(id = %record.id, %key, "Suppressing duplicate record");
                }
                duplicate
            }
            Ok(None) => false,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Extracting dedup key, delivering the record anyway");
                false
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken) {
        if self.read_interval.is_zero() {
            return;
        }
        debug!(read_interval = ?self.read_interval, "Pausing before the next batch");
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.read_interval) => {}
        }
    }
}

impl<T: Transport + Sync> Sink for DeliverySink<T> {
    async fn handle(&self, batch: Vec<Record>, cancel: CancellationToken) -> Vec<Response> {
        let duplicates: Vec<bool> = batch.iter().map(|r| self.is_duplicate(r)).collect();
        let survivors: Vec<&[u8]> = batch
            .iter()
            .zip(&duplicates)
            .filter(|(_, duplicate)| !**duplicate)
            .map(|(record, _)| record.payload.as_slice())
            .collect();

        let outcome = match self.aggregator.aggregate(&survivors) {
            Ok(Some(unit)) => {
                let outcome = self.dispatcher.dispatch(&unit, &cancel).await;
                if outcome == DeliveryOutcome::Success {
                    self.pause(&cancel).await;
                }
                outcome
            }
            Ok(None) => {
                debug!(records = batch.len(), "Nothing to send");
                DeliveryOutcome::Success
            }
            Err(e) => {
                error!(error = %e, records = survivors.len(), "Aggregating batch");
                self.metrics.failed_total.inc();
                DeliveryOutcome::FailurePermanent
            }
        };

        reconcile(&batch, &duplicates, outcome, &self.failure_message)
    }
}

/// Adapts a [Sink] onto the numaflow sink server. Every batch gets a child of the process
/// shutdown token, cancelled at the latest when `batch_timeout` passes.
pub struct SinkerService<S> {
    sink: S,
    shutdown: CancellationToken,
    batch_timeout: Option<Duration>,
}

impl<S> SinkerService<S> {
    pub fn new(sink: S, shutdown: CancellationToken, batch_timeout: Option<Duration>) -> Self {
        Self {
            sink,
            shutdown,
            batch_timeout,
        }
    }
}

#[tonic::async_trait]
impl<S> sink::Sinker for SinkerService<S>
where
    S: Sink + Sync + 'static,
{
    async fn sink(&self, mut input: mpsc::Receiver<SinkRequest>) -> Vec<sink::Response> {
        let mut batch = Vec::new();
        while let Some(request) = input.recv().await {
            batch.push(Record::from(request));
        }
        let size = batch.len();

        let cancel = self.shutdown.child_token();
        // stops the deadline task once the batch is answered
        let _guard = cancel.clone().drop_guard();
        if let Some(timeout) = self.batch_timeout {
            let deadline = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = deadline.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        warn!(?timeout, "Batch deadline passed");
                        deadline.cancel();
                    }
                }
            });
        }

        let responses = self.sink.handle(batch, cancel).await;
        let failed = responses.iter().filter(|r| !r.is_ok()).count();
        info!(records = size, failed, "Batch processed");

        responses.into_iter().map(sink::Response::from).collect()
    }
}
