//! Submits one Argo Workflow per batch through the Argo Server REST API.

use reqwest::{Client, StatusCode, Url};
use serde_json::{Value, json};
use tracing::info;

use crate::Error;
use crate::aggregate::OutboundUnit;
use crate::config::workflow::WorkflowConfig;
use crate::dispatch::Transport;
use crate::error::Result;

const WORKFLOW_SKELETON: &str = r#"{
  "apiVersion": "argoproj.io/v1alpha1",
  "kind": "Workflow",
  "metadata": {
    "generateName": "{{WORKFLOW_NAME_PREFIX}}-wf-",
    "namespace": "{{WORKFLOW_NAMESPACE}}"
  },
  "spec": {
    "serviceAccountName": "{{WORKFLOW_SERVICE_ACCOUNT}}",
    "workflowTemplateRef": {
      "name": "{{ARGO_WORKFLOW_TEMPLATE}}"
    }
  }
}"#;

/// Fills the skeleton's placeholders. Values are JSON escaped, a placeholder left over or an
/// unparsable result is a configuration error.
pub fn render_workflow(config: &WorkflowConfig) -> Result<Value> {
    let substitutions = [
        ("{{WORKFLOW_NAME_PREFIX}}", config.name_prefix.as_str()),
        ("{{WORKFLOW_NAMESPACE}}", config.namespace.as_str()),
        ("{{WORKFLOW_SERVICE_ACCOUNT}}", config.service_account.as_str()),
        ("{{ARGO_WORKFLOW_TEMPLATE}}", config.template.as_str()),
    ];

    let rendered = substitutions
        .iter()
        .fold(WORKFLOW_SKELETON.to_string(), |acc, (placeholder, value)| {
            acc.replace(placeholder, &json_escape(value))
        });

    if let Some(start) = rendered.find("{{") {
        let placeholder: String = rendered.chars().skip(start).take_while(|c| *c != '"').collect();
        return Err(Error::Config(format!(
            "Unresolved placeholder {placeholder} in workflow"
        )));
    }

    let mut workflow: Value = serde_json::from_str(&rendered)
        .map_err(|e| Error::Config(format!("Rendered workflow is not valid JSON: {e}")))?;

    // let Argo pick the default service account
    if config.service_account.is_empty()
        && let Some(spec) = workflow.get_mut("spec").and_then(Value::as_object_mut)
    {
        spec.remove("serviceAccountName");
    }
    Ok(workflow)
}

fn json_escape(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or_default()
        .to_string()
}

/// `{server}/api/v1/workflows/{namespace}`, the namespace percent-encoded as one path segment.
fn workflows_endpoint(config: &WorkflowConfig) -> Result<Url> {
    let invalid = || Error::Config(format!("Invalid Argo Server URL {:?}", config.server_url));
    let mut endpoint = Url::parse(&config.server_url).map_err(|_| invalid())?;
    endpoint
        .path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(["api", "v1", "workflows", config.namespace.as_str()]);
    Ok(endpoint)
}

/// Creates a workflow from the rendered skeleton with the batch as its single parameter.
#[derive(Debug, Clone)]
pub struct WorkflowTransport {
    client: Client,
    endpoint: Url,
    namespace: String,
    parameter_name: String,
    token: Option<String>,
    workflow: Value,
}

impl WorkflowTransport {
    pub fn new(config: &WorkflowConfig) -> Result<Self> {
        let workflow = render_workflow(config)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| Error::Config(format!("Building Argo Server client: {e}")))?;

        Ok(Self {
            client,
            endpoint: workflows_endpoint(config)?,
            namespace: config.namespace.clone(),
            parameter_name: config.parameter_name.clone(),
            token: config.token.clone(),
            workflow,
        })
    }

    fn create_request(&self, parameter: String) -> Value {
        let mut workflow = self.workflow.clone();
        workflow["spec"]["arguments"] = json!({
            "parameters": [{"name": self.parameter_name, "value": parameter}]
        });
        json!({"namespace": self.namespace, "workflow": workflow})
    }
}

impl Transport for WorkflowTransport {
    async fn deliver(&self, unit: &OutboundUnit) -> Result<()> {
        let body = self.create_request(unit.to_json()?);

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = format!("Argo Server replied {status}: {text}");
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Error::Transport(message)
                } else {
                    Error::Rejected(message)
                },
            );
        }

        let created: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let Some(name) = created
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
        else {
            return Err(Error::Transport(format!(
                "Argo Server did not acknowledge the workflow: {text}"
            )));
        };

        info!(workflow = name, namespace = %self.namespace, "Workflow created");
        Ok(())
    }
}
