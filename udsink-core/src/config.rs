//! Settings are read from the environment once at startup. Every parse failure is a
//! [Error::Config], the process refuses to start on it.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use crate::Error;
use crate::error::Result;

pub mod http;
pub mod prometheus;
pub mod workflow;

const ENV_MSG_DEDUP_KEYS: &str = "MSG_DEDUP_KEYS";
const ENV_DEDUP_CACHE_LIMIT: &str = "DEDUP_CACHE_LIMIT";
const ENV_DEDUP_CACHE_TTL_DURATION: &str = "DEDUP_CACHE_TTL_DURATION";
const ENV_RETRY_MAX_ATTEMPTS: &str = "RETRY_MAX_ATTEMPTS";
const ENV_RETRY_INITIAL_INTERVAL: &str = "RETRY_INITIAL_INTERVAL";
const ENV_RETRY_FACTOR: &str = "RETRY_FACTOR";
const ENV_RETRY_MAX_INTERVAL: &str = "RETRY_MAX_INTERVAL";
const ENV_RETRY_JITTER: &str = "RETRY_JITTER";
const ENV_DROP_ON_ERROR: &str = "DROP_ON_ERROR";
const ENV_BATCH_TIMEOUT: &str = "BATCH_TIMEOUT";
const ENV_READ_INTERVAL_DURATION: &str = "READ_INTERVAL_DURATION";
const ENV_METRICS_PORT: &str = "UDSINK_METRICS_PORT";
const ENV_METRICS_LABELS: &str = "UDSINK_METRICS_LABELS";

const DEFAULT_DEDUP_CACHE_LIMIT: i64 = 100;
const DEFAULT_DEDUP_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_RETRY_FACTOR: f64 = 2.0;
const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_WORKFLOW_READ_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_METRICS_PORT: u16 = 9090;

/// The downstream system a sink process talks to. Chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Http,
    Workflow,
    Prometheus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlavorConfig {
    Http(http::HttpConfig),
    Workflow(workflow::WorkflowConfig),
    Prometheus(prometheus::PrometheusConfig),
}

impl FlavorConfig {
    /// The message every undelivered record is failed with.
    pub fn failure_message(&self) -> &'static str {
        match self {
            FlavorConfig::Http(_) => "failed to send the request",
            FlavorConfig::Workflow(_) => "failed to trigger workflow",
            FlavorConfig::Prometheus(_) => "failed to push the metrics",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupConfig {
    pub keys: Vec<String>,
    pub capacity: i64,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub factor: f64,
    pub max_backoff: Duration,
    pub jitter: f64,
    /// Acknowledge the records anyway once attempts are exhausted.
    pub drop_on_exhaustion: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_RETRY_INTERVAL,
            factor: DEFAULT_RETRY_FACTOR,
            max_backoff: DEFAULT_MAX_RETRY_INTERVAL,
            jitter: 0.0,
            drop_on_exhaustion: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub port: u16,
    /// Constant labels attached to every sink metric.
    pub labels: Vec<(String, String)>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_METRICS_PORT,
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub flavor: FlavorConfig,
    /// `None` when no dedup keys are configured.
    pub dedup: Option<DedupConfig>,
    pub retry: RetryConfig,
    pub metrics: MetricsConfig,
    /// Deadline for a whole batch, retries included.
    pub batch_timeout: Option<Duration>,
    /// Pause after a successful delivery before the next batch is taken.
    pub read_interval: Duration,
}

impl Settings {
    pub fn load(
        flavor: Flavor,
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env = Env::new(env_vars);

        let flavor = match flavor {
            Flavor::Http => FlavorConfig::Http(http::HttpConfig::load(&env)?),
            Flavor::Workflow => FlavorConfig::Workflow(workflow::WorkflowConfig::load(&env)?),
            Flavor::Prometheus => {
                FlavorConfig::Prometheus(prometheus::PrometheusConfig::load(&env)?)
            }
        };

        let keys = env.list(ENV_MSG_DEDUP_KEYS);
        let dedup = if keys.is_empty() {
            None
        } else {
            let capacity = env.parse(ENV_DEDUP_CACHE_LIMIT, DEFAULT_DEDUP_CACHE_LIMIT)?;
            if capacity <= 0 {
                return Err(Error::Config(format!(
                    "{ENV_DEDUP_CACHE_LIMIT} must be a positive integer, got {capacity}"
                )));
            }
            Some(DedupConfig {
                keys,
                capacity,
                ttl: env.duration(ENV_DEDUP_CACHE_TTL_DURATION, DEFAULT_DEDUP_CACHE_TTL)?,
            })
        };

        let default_read_interval = match flavor {
            FlavorConfig::Workflow(_) => DEFAULT_WORKFLOW_READ_INTERVAL,
            FlavorConfig::Http(_) | FlavorConfig::Prometheus(_) => Duration::ZERO,
        };

        Ok(Self {
            retry: load_retry(&env, &flavor)?,
            dedup,
            metrics: MetricsConfig {
                port: env.parse(ENV_METRICS_PORT, DEFAULT_METRICS_PORT)?,
                labels: env.map(ENV_METRICS_LABELS)?.into_iter().collect(),
            },
            batch_timeout: env
                .get(ENV_BATCH_TIMEOUT)
                .map(|v| parse_duration(ENV_BATCH_TIMEOUT, v))
                .transpose()?,
            read_interval: env.duration(ENV_READ_INTERVAL_DURATION, default_read_interval)?,
            flavor,
        })
    }
}

fn load_retry(env: &Env, flavor: &FlavorConfig) -> Result<RetryConfig> {
    let max_attempts = match (flavor, env.get(ENV_RETRY_MAX_ATTEMPTS)) {
        (FlavorConfig::Http(_), None) => env.parse(http::ENV_HTTP_RETRIES, DEFAULT_MAX_ATTEMPTS)?,
        _ => env.parse(ENV_RETRY_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS)?,
    };
    if max_attempts == 0 {
        return Err(Error::Config(format!(
            "{ENV_RETRY_MAX_ATTEMPTS} must be at least 1"
        )));
    }

    let factor = env.parse(ENV_RETRY_FACTOR, DEFAULT_RETRY_FACTOR)?;
    if factor < 1.0 || !factor.is_finite() {
        return Err(Error::Config(format!(
            "{ENV_RETRY_FACTOR} must be a finite number >= 1, got {factor}"
        )));
    }

    let jitter = env.parse(ENV_RETRY_JITTER, 0.0)?;
    if !(0.0..1.0).contains(&jitter) {
        return Err(Error::Config(format!(
            "{ENV_RETRY_JITTER} must be in [0, 1), got {jitter}"
        )));
    }

    Ok(RetryConfig {
        max_attempts,
        initial_backoff: env.duration(ENV_RETRY_INITIAL_INTERVAL, DEFAULT_INITIAL_RETRY_INTERVAL)?,
        factor,
        max_backoff: env.duration(ENV_RETRY_MAX_INTERVAL, DEFAULT_MAX_RETRY_INTERVAL)?,
        jitter,
        drop_on_exhaustion: env.bool(ENV_DROP_ON_ERROR, false)?,
    })
}

/// Environment snapshot with typed accessors. Blank values count as unset.
pub(crate) struct Env(HashMap<String, String>);

impl Env {
    pub(crate) fn new(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        Self(
            env_vars
                .into_iter()
                .map(|(key, val)| (key.into(), val.into()))
                .collect(),
        )
    }

    pub(crate) fn get(&self, var: &str) -> Option<&str> {
        self.0
            .get(var)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn required(&self, var: &str) -> Result<String> {
        self.get(var)
            .map(str::to_string)
            .ok_or_else(|| Error::Config(format!("Environment variable {var} is not set")))
    }

    pub(crate) fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or(default).to_string()
    }

    pub(crate) fn parse<T>(&self, var: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|e| Error::Config(format!("Invalid value {v:?} for {var}: {e}"))),
        }
    }

    pub(crate) fn bool(&self, var: &str, default: bool) -> Result<bool> {
        self.get(var)
            .map_or(Ok(default), |v| parse_bool(var, v))
    }

    pub(crate) fn duration(&self, var: &str, default: Duration) -> Result<Duration> {
        self.get(var)
            .map_or(Ok(default), |v| parse_duration(var, v))
    }

    /// Comma separated values, trimmed, blanks dropped.
    pub(crate) fn list(&self, var: &str) -> Vec<String> {
        self.get(var)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `k1=v1,k2=v2`
    pub(crate) fn map(&self, var: &str) -> Result<BTreeMap<String, String>> {
        let Some(value) = self.get(var) else {
            return Ok(BTreeMap::new());
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() => {
                    Ok((k.trim().to_string(), v.trim().to_string()))
                }
                _ => Err(Error::Config(format!(
                    "Invalid entry {entry:?} in {var}, expected key=value"
                ))),
            })
            .collect()
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(Error::Config(format!(
            "Invalid value {value:?} for {var}, expected a boolean"
        ))),
    }
}

fn parse_duration(var: &str, value: &str) -> Result<Duration> {
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(value)
        .map_err(|e| Error::Config(format!("Invalid duration {value:?} for {var}: {e}")))
}
