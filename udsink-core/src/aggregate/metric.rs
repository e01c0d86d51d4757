use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::Error;
use crate::config::prometheus::PrometheusConfig;
use crate::error::Result;
use crate::metrics::SinkMetrics;

/// The only sample type the push path understands.
pub const GAUGE: &str = "Gauge";

const TRANSFORMED_SUBSYSTEM: &str = "none";
const ANOMALY_SUFFIX: &str = "_anomaly";
const ARTIFACT_VERSIONS_KEY: &str = "artifact_versions";
const MODEL_VERSION_KEY: &str = "model_version";
const NAMESPACE_KEY: &str = "namespace";

/// A scalar metric sample as carried in a record payload.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct MetricSample {
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: Option<i64>,
    pub name: String,
    pub namespace: String,
    pub subsystem: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
}

impl MetricSample {
    /// Adds `defaults` the sample does not carry itself.
    pub fn merge_labels(&mut self, defaults: &BTreeMap<String, String>) {
        for (key, val) in defaults {
            self.labels
                .entry(key.clone())
                .or_insert_with(|| val.clone());
        }
    }

    pub fn exclude_labels(&mut self, excluded: &[String]) {
        for key in excluded {
            self.labels.remove(key);
        }
    }

    fn ensure_supported(&self) -> Result<()> {
        if self.metric_type == GAUGE {
            return Ok(());
        }
        Err(Error::UnsupportedType(format!(
            "unsupported metric type {:?} for sample {:?}",
            self.metric_type, self.name
        )))
    }

    /// Push gateway job, `namespace_subsystem_name`.
    pub fn job(&self) -> String {
        format!("{}_{}_{}", self.namespace, self.subsystem, self.name)
    }

    /// The sample in the Prometheus text exposition format. Labels travel in the grouping key,
    /// not here.
    pub fn exposition(&self) -> String {
        let value = format_value(self.value);
        match self.timestamp_ms {
            Some(ts) => format!("# TYPE {0} gauge\n{0} {value} {ts}\n", self.name),
            None => format!("# TYPE {0} gauge\n{0} {value}\n", self.name),
        }
    }

    pub fn size(&self) -> usize {
        self.exposition().len()
    }
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { '+' } else { '-' };
        format!("{sign}Inf")
    } else {
        value.to_string()
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn label_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Output document of the anomaly detector, turned into samples when the message transformer
/// is enabled.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnomalyDocument {
    pub uuid: String,
    pub config_id: String,
    pub composite_keys: Vec<String>,
    pub timestamp: i64,
    pub unified_anomaly: Value,
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

impl AnomalyDocument {
    /// One unified sample named `metric_name`, then one `<key>_anomaly` sample per numeric
    /// `data` entry. All of them share the labels derived from `metadata`.
    pub fn into_samples(self, metric_name: &str) -> Vec<MetricSample> {
        let labels: BTreeMap<String, String> = self
            .metadata
            .iter()
            .filter(|(key, _)| key.as_str() != ARTIFACT_VERSIONS_KEY)
            .map(|(key, val)| {
                let label = match (key.as_str(), val.as_f64()) {
                    (MODEL_VERSION_KEY, Some(version)) => format!("{version:.1}"),
                    _ => label_value(val),
                };
                (key.clone(), label)
            })
            .collect();

        let namespace = self
            .metadata
            .get(NAMESPACE_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let sample = |name: String, value: f64| MetricSample {
            timestamp_ms: Some(self.timestamp).filter(|ts| *ts != 0),
            name,
            namespace: namespace.clone(),
            subsystem: TRANSFORMED_SUBSYSTEM.to_string(),
            metric_type: GAUGE.to_string(),
            value: round4(value),
            labels: labels.clone(),
        };

        let unified = self.unified_anomaly.as_f64().unwrap_or(0.0);
        let mut samples = vec![sample(metric_name.to_string(), unified)];
        samples.extend(self.data.iter().filter_map(|(key, val)| {
            val.as_f64()
                .map(|value| sample(format!("{key}{ANOMALY_SUFFIX}"), value))
        }));
        samples
    }
}

/// Decodes record payloads into samples, applying the label policy of the process.
#[derive(Debug, Clone)]
pub struct MetricDecoder {
    strict: bool,
    default_labels: BTreeMap<String, String>,
    exclude_labels: Vec<String>,
    metric_name: String,
    enable_msg_transformer: bool,
    ignore_metrics_ts: bool,
    metrics: Arc<SinkMetrics>,
}

impl MetricDecoder {
    pub fn new(config: &PrometheusConfig, metrics: Arc<SinkMetrics>) -> Self {
        Self {
            strict: config.strict,
            default_labels: config.default_labels.clone(),
            exclude_labels: config.exclude_labels.clone(),
            metric_name: config.metric_name.clone(),
            enable_msg_transformer: config.enable_msg_transformer,
            ignore_metrics_ts: config.ignore_metrics_ts,
            metrics,
        }
    }

    /// Decodes every payload. In strict mode the first bad payload fails the batch, otherwise it
    /// is skipped.
    pub fn decode_all(&self, payloads: &[&[u8]]) -> Result<Vec<MetricSample>> {
        let mut samples = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match self.decode(payload) {
                Ok(decoded) => samples.extend(decoded),
                Err(e) => {
                    self.metrics.skipped_total.inc();
                    if self.strict {
                        return Err(e);
                    }
                    warn!(error = %e, "Skipping undecodable metric payload");
                }
            }
        }
        Ok(samples)
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Vec<MetricSample>> {
        let samples = if self.enable_msg_transformer {
            serde_json::from_slice::<AnomalyDocument>(payload)
                .map_err(|e| Error::Decode(format!("Invalid anomaly document: {e}")))?
                .into_samples(&self.metric_name)
        } else {
            vec![
                serde_json::from_slice::<MetricSample>(payload)
                    .map_err(|e| Error::Decode(format!("Invalid metric sample: {e}")))?,
            ]
        };

        samples
            .into_iter()
            .map(|mut sample| {
                sample.merge_labels(&self.default_labels);
                sample.exclude_labels(&self.exclude_labels);
                sample.timestamp_ms = sample
                    .timestamp_ms
                    .filter(|ts| *ts != 0 && !self.ignore_metrics_ts);
                sample.ensure_supported()?;
                Ok(sample)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use prometheus_client::registry::Registry;

    use super::*;

    const ANOMALY: &str = r#"{"uuid":"35e0dc4603c845c9b999f5f669c64606","config_id":"test","composite_keys":["test_namespace","test_app","597b5bd8cc"],"timestamp":1701201827,"unified_anomaly":1.2,"data":{"namespace_app_rollouts_cpu_utilization":0.517299409015888,"namespace_app_rollouts_http_request_error_rate":0.517299409015888,"namespace_app_rollouts_memory_utilization":0.517299409015888,"namespace_app_rollouts_http_requests_latency":null},"metadata":{"model_version":0,"artifact_versions":{"MinMaxScaler":"0","LSTMAE":"0","StdDevThreshold":"0"},"app":"test-app","intuit_alert":"true","namespace":"test-namespace","numalogic":"true","prometheus":"k8s-prometheus","rollouts_pod_template_hash":"597b5bd8cc"}}"#;

    const GAUGE_SAMPLE: &str = r#"{"timestampMs":1701201827000,"name":"cpu","namespace":"ns","subsystem":"app","type":"Gauge","value":0.5,"labels":{"app":"checkout","numalogic":"true"}}"#;

    fn config() -> PrometheusConfig {
        PrometheusConfig {
            server: "http://localhost:9091".into(),
            strict: true,
            default_labels: BTreeMap::new(),
            exclude_labels: vec![],
            metric_name: "unified".into(),
            enable_msg_transformer: false,
            ignore_metrics_ts: true,
            push_timeout: Duration::from_secs(1),
        }
    }

    fn metrics() -> Arc<SinkMetrics> {
        Arc::new(SinkMetrics::new(&mut Registry::default(), vec![]))
    }

    #[test]
    fn test_anomaly_document_into_samples() {
        let doc: AnomalyDocument = serde_json::from_str(ANOMALY).unwrap();
        let samples = doc.into_samples("test");

        // unified + three numeric data entries, the null one is left out
        assert_eq!(samples.len(), 4);

        let unified = &samples[0];
        assert_eq!(unified.name, "test");
        assert_eq!(unified.timestamp_ms, Some(1701201827));
        assert_eq!(unified.value, 1.2);
        assert_eq!(unified.namespace, "test-namespace");
        assert_eq!(unified.subsystem, "none");
        assert_eq!(unified.metric_type, GAUGE);
        assert_eq!(unified.labels["app"], "test-app");
        assert_eq!(unified.labels["namespace"], "test-namespace");
        assert_eq!(unified.labels["rollouts_pod_template_hash"], "597b5bd8cc");
        assert_eq!(unified.labels["model_version"], "0.0");
        assert!(!unified.labels.contains_key("artifact_versions"));

        let cpu = samples
            .iter()
            .find(|s| s.name == "namespace_app_rollouts_cpu_utilization_anomaly")
            .unwrap();
        assert_eq!(cpu.value, 0.5173);
        assert_eq!(cpu.labels, unified.labels);
        assert!(
            samples
                .iter()
                .any(|s| s.name == "namespace_app_rollouts_memory_utilization_anomaly")
        );
    }

    #[test]
    fn test_merge_and_exclude_labels() {
        let mut sample: MetricSample = serde_json::from_str(GAUGE_SAMPLE).unwrap();
        sample.merge_labels(&BTreeMap::from([
            ("app".to_string(), "default-app".to_string()),
            ("label1".to_string(), "value1".to_string()),
        ]));
        // payload wins
        assert_eq!(sample.labels["app"], "checkout");
        assert_eq!(sample.labels["label1"], "value1");

        sample.exclude_labels(&["label1".to_string(), "numalogic".to_string()]);
        assert!(!sample.labels.contains_key("label1"));
        assert!(!sample.labels.contains_key("numalogic"));

        sample.exclude_labels(&[]);
        assert_eq!(sample.labels.len(), 1);
    }

    #[test]
    fn test_decode_applies_policy() {
        let mut config = config();
        config.default_labels = BTreeMap::from([("cluster".to_string(), "prod".to_string())]);
        config.exclude_labels = vec!["numalogic".to_string()];
        let decoder = MetricDecoder::new(&config, metrics());

        let samples = decoder.decode(GAUGE_SAMPLE.as_bytes()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp_ms, None);
        assert_eq!(
            samples[0].labels,
            BTreeMap::from([
                ("app".to_string(), "checkout".to_string()),
                ("cluster".to_string(), "prod".to_string()),
            ])
        );

        config.ignore_metrics_ts = false;
        let decoder = MetricDecoder::new(&config, metrics());
        let samples = decoder.decode(GAUGE_SAMPLE.as_bytes()).unwrap();
        assert_eq!(samples[0].timestamp_ms, Some(1701201827000));
    }

    #[test]
    fn test_transformer() {
        let mut config = config();
        config.enable_msg_transformer = true;
        let decoder = MetricDecoder::new(&config, metrics());

        let samples = decoder.decode(ANOMALY.as_bytes()).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].name, "unified");
    }

    #[test]
    fn test_only_gauge_supported() {
        let decoder = MetricDecoder::new(&config(), metrics());
        let counter = GAUGE_SAMPLE.replace("Gauge", "Counter");
        assert!(matches!(
            decoder.decode(counter.as_bytes()),
            Err(Error::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_strict_fails_batch() {
        let metrics = metrics();
        let decoder = MetricDecoder::new(&config(), Arc::clone(&metrics));
        let payloads: [&[u8]; 2] = [GAUGE_SAMPLE.as_bytes(), b"not json"];

        assert!(matches!(
            decoder.decode_all(&payloads),
            Err(Error::Decode(_))
        ));
        assert_eq!(metrics.skipped_total.get(), 1);
    }

    #[test]
    fn test_lenient_skips() {
        let metrics = metrics();
        let mut config = config();
        config.strict = false;
        let decoder = MetricDecoder::new(&config, Arc::clone(&metrics));
        let counter = GAUGE_SAMPLE.replace("Gauge", "Counter");
        let payloads: [&[u8]; 3] = [GAUGE_SAMPLE.as_bytes(), b"not json", counter.as_bytes()];

        let samples = decoder.decode_all(&payloads).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(metrics.skipped_total.get(), 2);
    }

    #[test]
    fn test_exposition() {
        let mut sample: MetricSample = serde_json::from_str(GAUGE_SAMPLE).unwrap();
        assert_eq!(sample.job(), "ns_app_cpu");
        assert_eq!(
            sample.exposition(),
            "# TYPE cpu gauge\ncpu 0.5 1701201827000\n"
        );

        sample.timestamp_ms = None;
        sample.value = f64::INFINITY;
        assert_eq!(sample.exposition(), "# TYPE cpu gauge\ncpu +Inf\n");
    }
}
