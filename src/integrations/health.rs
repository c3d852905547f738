//! Generic HTTP health-check integration
//!
//! Many self-hosted services expose a plain status endpoint. This integration
//! issues `GET <url><path>`, authenticates with a bearer API key when one is
//! configured, and optionally checks that the body is a JSON object carrying
//! a set of required fields.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

use super::context::{IntegrationContext, SecretKind};
use super::traits::{Integration, Operations};
use crate::error::{check_status, parse_json, BoxError, ParseError};
use crate::transport::Transport;

/// Name of the health read operation.
pub const GET_HEALTH: &str = "getHealth";

fn default_path() -> String {
    "/".to_string()
}

/// What the health endpoint looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Path below the integration URL
    #[serde(default = "default_path")]
    pub path: String,

    /// Require the body to be JSON
    #[serde(default)]
    pub expect_json: bool,

    /// Top-level fields the JSON body must contain (implies `expect_json`)
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            expect_json: false,
            required_fields: Vec::new(),
        }
    }
}

impl HealthCheckConfig {
    fn validates_json(&self) -> bool {
        self.expect_json || !self.required_fields.is_empty()
    }
}

/// Outcome of a successful health read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// HTTP status returned by the endpoint
    pub status_code: u16,
    /// Parsed body when JSON validation is enabled
    pub body: Option<serde_json::Value>,
}

/// Integration for services with a plain health endpoint.
pub struct HealthCheckIntegration {
    context: IntegrationContext,
    config: HealthCheckConfig,
}

impl HealthCheckIntegration {
    pub fn new(context: IntegrationContext, config: HealthCheckConfig) -> Self {
        Self { context, config }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Reads the health endpoint.
    pub async fn get_health(&self, transport: &Transport) -> Result<HealthReport, BoxError> {
        let url = self.context.url(&self.config.path, &[])?;
        tracing::debug!(integration = %self.context.identity().name, %url, "reading health endpoint");

        let mut request = transport.client().get(url);
        if self.config.validates_json() {
            request = request.header(ACCEPT, "application/json");
        }
        if let Ok(api_key) = self.context.secret(SecretKind::ApiKey) {
            request = request.bearer_auth(api_key);
        }

        let response = check_status(request.send().await?)?;
        let status_code = response.status().as_u16();

        if !self.config.validates_json() {
            return Ok(HealthReport {
                status_code,
                body: None,
            });
        }

        let bytes = response.bytes().await?;
        let body: serde_json::Value = parse_json(&bytes)?;
        self.validate(&body)?;

        Ok(HealthReport {
            status_code,
            body: Some(body),
        })
    }

    fn validate(&self, body: &serde_json::Value) -> Result<(), ParseError> {
        let object = body
            .as_object()
            .ok_or_else(|| ParseError::new("expected a JSON object"))?;

        match self
            .config
            .required_fields
            .iter()
            .find(|field| !object.contains_key(field.as_str()))
        {
            Some(missing) => Err(ParseError::new(format!("missing field `{}`", missing))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Integration for HealthCheckIntegration {
    fn context(&self) -> &IntegrationContext {
        &self.context
    }

    fn operations(&self) -> Operations {
        Operations::base().with(GET_HEALTH)
    }

    async fn probe(&self, transport: &Transport) -> Result<(), BoxError> {
        self.get_health(transport).await.map(|_| ())
    }
}
