use std::time::Duration;

use reqwest::Method;

use crate::Error;
use crate::config::Env;
use crate::error::Result;

const ENV_HTTP_URL: &str = "HTTP_URL";
const ENV_HTTP_METHOD: &str = "HTTP_METHOD";
const ENV_HTTP_TIMEOUT: &str = "HTTP_TIMEOUT";
const ENV_HTTP_HEADERS: &str = "HTTP_HEADERS";
const ENV_HTTP_INSECURE_SKIP_TLS_VERIFY: &str = "HTTP_INSECURE_SKIP_TLS_VERIFY";
const ENV_HTTP_FAIL_ON_NON_2XX: &str = "HTTP_FAIL_ON_NON_2XX";
/// Older name for `RETRY_MAX_ATTEMPTS`.
pub(crate) const ENV_HTTP_RETRIES: &str = "HTTP_RETRIES";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub insecure_skip_tls_verify: bool,
    /// Treat a non-2xx reply as a transport failure.
    pub fail_on_non_2xx: bool,
}

impl HttpConfig {
    pub(crate) fn load(env: &Env) -> Result<Self> {
        let method = env.string(ENV_HTTP_METHOD, "POST").to_ascii_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid {ENV_HTTP_METHOD} {method:?}: {e}")))?;

        Ok(Self {
            url: env.required(ENV_HTTP_URL)?,
            method,
            timeout: env.duration(ENV_HTTP_TIMEOUT, DEFAULT_HTTP_TIMEOUT)?,
            headers: env.map(ENV_HTTP_HEADERS)?.into_iter().collect(),
            insecure_skip_tls_verify: env.bool(ENV_HTTP_INSECURE_SKIP_TLS_VERIFY, false)?,
            fail_on_non_2xx: env.bool(ENV_HTTP_FAIL_ON_NON_2XX, false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let env = Env::new([
            ("HTTP_URL", "https://example.com/hook"),
            ("HTTP_METHOD", "put"),
            ("HTTP_TIMEOUT", "5s"),
            ("HTTP_HEADERS", "x-team=numa,authorization=Bearer abc"),
            ("HTTP_INSECURE_SKIP_TLS_VERIFY", "true"),
        ]);
        let config = HttpConfig::load(&env).unwrap();
        assert_eq!(
            config,
            HttpConfig {
                url: "https://example.com/hook".into(),
                method: Method::PUT,
                timeout: Duration::from_secs(5),
                headers: vec![
                    ("authorization".into(), "Bearer abc".into()),
                    ("x-team".into(), "numa".into()),
                ],
                insecure_skip_tls_verify: true,
                fail_on_non_2xx: false,
            }
        );
    }

    #[test]
    fn test_url_required() {
        let err = HttpConfig::load(&Env::new([("HTTP_METHOD", "POST")])).unwrap_err();
        assert_eq!(
            err,
            Error::Config("Environment variable HTTP_URL is not set".into())
        );
    }

    #[test]
    fn test_defaults() {
        let config = HttpConfig::load(&Env::new([("HTTP_URL", "http://x")])).unwrap();
        assert_eq!(config.method, Method::POST);
        assert_eq!(config.timeout, DEFAULT_HTTP_TIMEOUT);
        assert!(config.headers.is_empty());
    }
}
