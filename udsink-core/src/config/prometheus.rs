use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::Env;
use crate::error::Result;

const ENV_PROMETHEUS_SERVER: &str = "PROMETHEUS_SERVER";
const ENV_SKIP_VALIDATION_FAILED: &str = "SKIP_VALIDATION_FAILED";
const ENV_METRICS_LABELS: &str = "METRICS_LABELS";
const ENV_EXCLUDE_METRICS_LABELS: &str = "EXCLUDE_METRICS_LABELS";
const ENV_METRICS_NAME: &str = "METRICS_NAME";
const ENV_ENABLE_MSG_TRANSFORMER: &str = "ENABLE_MSG_TRANSFORMER";
const ENV_IGNORE_METRICS_TS: &str = "IGNORE_METRICS_TS";
const ENV_PUSH_TIMEOUT: &str = "PUSH_TIMEOUT";

const DEFAULT_METRICS_NAME: &str = "namespace_app_rollouts_unified_anomaly";
const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Push gateway base URL.
    pub server: String,
    /// Fail the whole batch on an undecodable sample instead of skipping it.
    pub strict: bool,
    /// Added to every sample unless the sample carries the label itself.
    pub default_labels: BTreeMap<String, String>,
    pub exclude_labels: Vec<String>,
    /// Name of the unified sample produced by the message transformer.
    pub metric_name: String,
    pub enable_msg_transformer: bool,
    pub ignore_metrics_ts: bool,
    pub push_timeout: Duration,
}

impl PrometheusConfig {
    pub(crate) fn load(env: &Env) -> Result<Self> {
        Ok(Self {
            server: env.required(ENV_PROMETHEUS_SERVER)?,
            strict: !env.bool(ENV_SKIP_VALIDATION_FAILED, false)?,
            default_labels: env.map(ENV_METRICS_LABELS)?,
            exclude_labels: env.list(ENV_EXCLUDE_METRICS_LABELS),
            metric_name: env.string(ENV_METRICS_NAME, DEFAULT_METRICS_NAME),
            enable_msg_transformer: env.bool(ENV_ENABLE_MSG_TRANSFORMER, false)?,
            ignore_metrics_ts: env.bool(ENV_IGNORE_METRICS_TS, true)?,
            push_timeout: env.duration(ENV_PUSH_TIMEOUT, DEFAULT_PUSH_TIMEOUT)?,
        })
    }
}
