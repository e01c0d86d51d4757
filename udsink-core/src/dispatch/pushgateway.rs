//! Pushes gauge samples to a Prometheus push gateway, one PUT per sample.

use std::sync::Arc;

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, info};

use crate::Error;
use crate::aggregate::OutboundUnit;
use crate::aggregate::metric::MetricSample;
use crate::config::prometheus::PrometheusConfig;
use crate::dispatch::Transport;
use crate::error::Result;
use crate::metrics::SinkMetrics;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";
const APP_LABEL: &str = "app";

#[derive(Debug, Clone)]
pub struct PushGatewayTransport {
    client: Client,
    server: Url,
    metrics: Arc<SinkMetrics>,
}

impl PushGatewayTransport {
    pub fn new(config: &PrometheusConfig, metrics: Arc<SinkMetrics>) -> Result<Self> {
        let server = Url::parse(&config.server).map_err(|e| {
            Error::Config(format!("Invalid push gateway URL {:?}: {e}", config.server))
        })?;
        if server.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Invalid push gateway URL {:?}",
                config.server
            )));
        }

        let client = Client::builder()
            .timeout(config.push_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Building push gateway client: {e}")))?;

        Ok(Self {
            client,
            server,
            metrics,
        })
    }

    /// `{server}/metrics/job/{job}/{label}/{value}...`, values that cannot travel as a plain path
    /// segment use the `@base64` form.
    fn grouping_url(&self, sample: &MetricSample) -> Result<Url> {
        let mut grouping = vec!["metrics".to_string()];
        grouping_pair(&mut grouping, "job", &sample.job());
        for (name, value) in &sample.labels {
            grouping_pair(&mut grouping, name, value);
        }

        let mut url = self.server.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid push gateway URL {}", self.server)))?
            .pop_if_empty()
            .extend(&grouping);
        Ok(url)
    }

    async fn push(&self, sample: &MetricSample) -> Result<()> {
        if !valid_metric_name(&sample.name) {
            return Err(Error::Rejected(format!(
                "invalid metric name {:?}",
                sample.name
            )));
        }

        let url = self.grouping_url(sample)?;
        debug!(%url, sample = ?sample, "Pushing sample");
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, TEXT_FORMAT)
            .body(sample.exposition())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("push gateway replied {status}: {text}");
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Error::Transport(message)
                } else {
                    Error::Rejected(message)
                },
            );
        }

        info!(name = %sample.name, job = %sample.job(), "Pushed sample");
        Ok(())
    }
}

fn grouping_pair(segments: &mut Vec<String>, name: &str, value: &str) {
    if value.is_empty() {
        segments.push(format!("{name}@base64"));
        segments.push("=".to_string());
    } else if value.contains('/') {
        segments.push(format!("{name}@base64"));
        segments.push(BASE64_URL_SAFE_NO_PAD.encode(value));
    } else {
        segments.push(name.to_string());
        segments.push(value.to_string());
    }
}

fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

impl Transport for PushGatewayTransport {
    async fn deliver(&self, unit: &OutboundUnit) -> Result<()> {
        let OutboundUnit::Samples(samples) = unit else {
            return Err(Error::Rejected(
                "push gateway only accepts metric samples".to_string(),
            ));
        };
        for sample in samples {
            self.push(sample).await?;
        }

        // counted once the whole unit is through, a retried unit pushes its samples again
        for sample in samples {
            let app = sample
                .labels
                .get(APP_LABEL)
                .map(String::as_str)
                .unwrap_or_default();
            self.metrics
                .inc_anomaly_generated(&sample.namespace, app, &sample.name);
        }
        Ok(())
    }
}
