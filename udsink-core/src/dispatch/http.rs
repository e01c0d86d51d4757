use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::{debug, info};

use crate::Error;
use crate::aggregate::OutboundUnit;
use crate::config::http::HttpConfig;
use crate::dispatch::Transport;
use crate::error::Result;

/// Sends the batch as one JSON array of payload strings to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    method: Method,
    headers: HeaderMap,
    fail_on_non_2xx: bool,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| Error::Config(format!("Building HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            method: config.method.clone(),
            headers,
            fail_on_non_2xx: config.fail_on_non_2xx,
        })
    }
}

impl Transport for HttpTransport {
    async fn deliver(&self, unit: &OutboundUnit) -> Result<()> {
        let body = unit.to_json()?;
        debug!(url = %self.url, size = body.len(), "Sending HTTP request");

        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && self.fail_on_non_2xx {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "{} replied {status}: {text}",
                self.url
            )));
        }
        info!(%status, "HTTP request sent");
        Ok(())
    }
}
