//! User-defined numaflow sinks that deliver each batch to an external system.
//!
//! Every flavor shares the same delivery core: records are deduplicated on a composite key,
//! the survivors are aggregated into one outbound unit, the unit is delivered with bounded
//! retries, and the single outcome is mapped back onto one response per record.

use std::net::SocketAddr;
use std::sync::Arc;

use numaflow::sink;
use prometheus_client::registry::Registry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use crate::config::Flavor;
pub use crate::error::{Error, Result};

use crate::aggregate::Aggregator;
use crate::aggregate::metric::MetricDecoder;
use crate::config::{FlavorConfig, Settings};
use crate::dedup::KeyExtractor;
use crate::dedup::cache::DedupCache;
use crate::dispatch::http::HttpTransport;
use crate::dispatch::pushgateway::PushGatewayTransport;
use crate::dispatch::workflow::WorkflowTransport;
use crate::dispatch::{Dispatcher, Transport};
use crate::metrics::{SinkMetrics, start_metrics_server};
use crate::sinker::{DeliverySink, SinkerService};

pub mod aggregate;
pub mod config;
pub mod dedup;
pub mod dispatch;
mod error;
pub mod expr;
pub mod message;
pub mod metrics;
pub mod reconcile;
pub mod sinker;

#[cfg(test)]
mod test_utils;

/// Runs the sink of the given flavor until SIGINT or SIGTERM. Settings are read from the
/// environment.
pub async fn run(flavor: Flavor) -> Result<()> {
    let settings = Settings::load(flavor, std::env::vars())?;
    info!(
        ?flavor,
        dedup = settings.dedup.is_some(),
        retry = ?settings.retry,
        "Starting sink"
    );

    let mut registry = Registry::default();
    let metrics = Arc::new(SinkMetrics::new(
        &mut registry,
        settings.metrics.labels.clone(),
    ));

    let shutdown = CancellationToken::new();
    let shutdown_on_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_on_signal.cancel();
    });

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], settings.metrics.port));
    let metrics_server = tokio::spawn(start_metrics_server(
        metrics_addr,
        Arc::new(registry),
        shutdown.clone(),
    ));

    let result = match &settings.flavor {
        FlavorConfig::Http(config) => {
            let transport = HttpTransport::new(config)?;
            serve(&settings, transport, Aggregator::JsonArray, metrics, &shutdown).await
        }
        FlavorConfig::Workflow(config) => {
            let transport = WorkflowTransport::new(config)?;
            serve(&settings, transport, Aggregator::JsonArray, metrics, &shutdown).await
        }
        FlavorConfig::Prometheus(config) => {
            let transport = PushGatewayTransport::new(config, Arc::clone(&metrics))?;
            let aggregator = Aggregator::Metrics(MetricDecoder::new(config, Arc::clone(&metrics)));
            serve(&settings, transport, aggregator, metrics, &shutdown).await
        }
    };

    // the sink server is gone, take the metrics server down with it
    shutdown.cancel();
    match metrics_server.await {
        Ok(Err(e)) => error!(?e, "Metrics server failed"),
        Err(e) => error!(?e, "Metrics server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Gracefully Exiting...");
    result
}

async fn serve<T>(
    settings: &Settings,
    transport: T,
    aggregator: Aggregator,
    metrics: Arc<SinkMetrics>,
    shutdown: &CancellationToken,
) -> Result<()>
where
    T: Transport + Sync + 'static,
{
    let dispatcher = Dispatcher::new(transport, settings.retry.clone(), Arc::clone(&metrics));
    let mut delivery = DeliverySink::new(
        aggregator,
        dispatcher,
        settings.flavor.failure_message(),
        metrics,
    )
    .with_read_interval(settings.read_interval);

    if let Some(dedup) = &settings.dedup {
        delivery = delivery.with_dedup(
            KeyExtractor::new(&dedup.keys),
            DedupCache::new(dedup.capacity, dedup.ttl)?,
        );
    }

    let service = SinkerService::new(delivery, shutdown.clone(), settings.batch_timeout);

    let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::oneshot::channel();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        server_shutdown.cancelled().await;
        let _ = server_shutdown_tx.send(());
    });

    sink::Server::new(service)
        .start_with_shutdown(server_shutdown_rx)
        .await
        .map_err(|e| Error::Server(format!("Running sink server: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!(?e, "Installing Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!(?e, "Installing terminate signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
