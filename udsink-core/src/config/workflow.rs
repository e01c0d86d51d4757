use std::time::Duration;

use tracing::debug;

use crate::config::Env;
use crate::error::Result;

const ENV_ARGO_SERVER_URL: &str = "ARGO_SERVER_URL";
const ENV_ARGO_WORKFLOW_TEMPLATE: &str = "ARGO_WORKFLOW_TEMPLATE";
const ENV_PARAMETER_NAME: &str = "PARAMETER_NAME";
const ENV_WORKFLOW_NAMESPACE: &str = "WORKFLOW_NAMESPACE";
const ENV_WORKFLOW_SERVICE_ACCOUNT: &str = "WORKFLOW_SERVICE_ACCOUNT";
const ENV_WORKFLOW_NAME_PREFIX: &str = "WORKFLOW_NAME_PREFIX";
const ENV_ARGO_SERVER_TOKEN: &str = "ARGO_SERVER_TOKEN";
const ENV_ARGO_INSECURE_SKIP_TLS_VERIFY: &str = "ARGO_INSECURE_SKIP_TLS_VERIFY";
const ENV_ARGO_REQUEST_TIMEOUT: &str = "ARGO_REQUEST_TIMEOUT";

const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
const SERVICE_ACCOUNT_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_NAME_PREFIX: &str = "argo";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Base URL of the Argo Server, e.g. `https://argo-server.argo:2746`.
    pub server_url: String,
    pub template: String,
    /// Name of the workflow argument carrying the batch.
    pub parameter_name: String,
    pub namespace: String,
    pub service_account: String,
    pub name_prefix: String,
    pub token: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub request_timeout: Duration,
}

impl WorkflowConfig {
    pub(crate) fn load(env: &Env) -> Result<Self> {
        Ok(Self {
            server_url: env.required(ENV_ARGO_SERVER_URL)?,
            template: env.required(ENV_ARGO_WORKFLOW_TEMPLATE)?,
            parameter_name: env.required(ENV_PARAMETER_NAME)?,
            namespace: env
                .get(ENV_WORKFLOW_NAMESPACE)
                .map(str::to_string)
                .or_else(|| read_trimmed(SERVICE_ACCOUNT_NAMESPACE_FILE))
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            service_account: env.string(ENV_WORKFLOW_SERVICE_ACCOUNT, ""),
            name_prefix: env.string(ENV_WORKFLOW_NAME_PREFIX, DEFAULT_NAME_PREFIX),
            token: env
                .get(ENV_ARGO_SERVER_TOKEN)
                .map(str::to_string)
                .or_else(|| read_trimmed(SERVICE_ACCOUNT_TOKEN_FILE)),
            insecure_skip_tls_verify: env.bool(ENV_ARGO_INSECURE_SKIP_TLS_VERIFY, false)?,
            request_timeout: env.duration(ENV_ARGO_REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)?,
        })
    }
}

fn read_trimmed(path: &str) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content.trim().to_string()).filter(|c| !c.is_empty()),
        Err(e) => {
            debug!(path, error = %e, "Service account file not readable");
            None
        }
    }
}
