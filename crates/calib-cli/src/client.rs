// crates/calib-cli/src/client.rs
// ============================================================================
// Module: RPC Client
// Description: HTTP client for the coordinator request channel.
// Purpose: Give operator commands and workers typed access to `POST /rpc`.
// Dependencies: calib-core, calib-server, reqwest, serde_json
// ============================================================================

//! ## Overview
//! [`RpcClient`] wraps one request per call in the `{method, params}`
//! envelope and decodes the [`Reply`] carrier. Business failures come back as
//! [`ClientError::Service`] with the server's [`ErrorKind`]; anything that
//! prevents a reply from arriving is a transport failure.
//!
//! ## Invariants
//! - Redirects are never followed.
//! - Response bodies are read with a hard size limit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use calib_core::CampaignId;
use calib_core::CampaignRequest;
use calib_core::CampaignStatus;
use calib_core::CampaignSummary;
use calib_core::ErrorKind;
use calib_core::Payload;
use calib_core::Reply;
use calib_core::RunStatus;
use calib_core::ServiceError;
use calib_core::SliceIndex;
use calib_core::StepCursor;
use calib_core::SubmitOutcome;
use calib_core::WorkerInput;
use calib_server::RpcRequest;
use calib_server::rpc::CampaignParams;
use calib_server::rpc::InputParams;
use calib_server::rpc::ResultParams;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum accepted response body size.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("client config error: {0}")]
    Config(String),
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),
    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(String),
    /// Response could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Response size exceeds limits.
    #[error("response exceeds size limit ({actual} > {limit})")]
    ResponseTooLarge {
        /// Actual size in bytes.
        actual: usize,
        /// Maximum size in bytes.
        limit: usize,
    },
    /// The service answered with a failure.
    #[error("{0}")]
    Service(ServiceError),
}

impl ClientError {
    /// Error classification reported to the operator.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Service(error) => error.kind,
            Self::Transport(_) | Self::ResponseTooLarge { .. } => ErrorKind::Transport,
            Self::Config(_) | Self::Json(_) => ErrorKind::Operator,
            Self::Protocol(_) => ErrorKind::Internal,
        }
    }

    /// True when no usable reply arrived, or the reply itself is a transport failure.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Typed client for one coordinator endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    /// HTTP client.
    client: Client,
    /// `POST /rpc` URL.
    endpoint: String,
    /// Response body limit.
    max_response_bytes: usize,
}

impl RpcClient {
    /// Builds a client with default limits.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the endpoint is not an http(s) URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_limits(endpoint, DEFAULT_TIMEOUT, MAX_RESPONSE_BYTES)
    }

    /// Builds a client with explicit limits.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the endpoint is invalid or the HTTP client
    /// cannot be constructed.
    pub fn with_limits(
        endpoint: impl Into<String>,
        timeout: Duration,
        max_response_bytes: usize,
    ) -> Result<Self, ClientError> {
        let endpoint = endpoint.into();
        let trimmed = endpoint.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ClientError::Config(format!("endpoint must be an http(s) url: {trimmed}")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self { client, endpoint: trimmed.to_string(), max_response_bytes })
    }

    /// Endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Creates a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn create_run(&self, request: &CampaignRequest) -> Result<CampaignId, ClientError> {
        self.call("create_run", request).await
    }

    /// Pulls the input of one slice.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn get_input(
        &self,
        campaign_id: CampaignId,
        slice: SliceIndex,
    ) -> Result<WorkerInput, ClientError> {
        self.call("get_input", &InputParams { campaign_id, slice }).await
    }

    /// Pushes the result of one slice.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn submit_result(
        &self,
        campaign_id: CampaignId,
        slice: SliceIndex,
        cursor: StepCursor,
        payload: Payload,
    ) -> Result<SubmitOutcome, ClientError> {
        let params = ResultParams { campaign_id, slice, cursor, payload };
        self.call("submit_result", &params).await
    }

    /// Reads the status of one campaign.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn status(&self, campaign_id: CampaignId) -> Result<CampaignStatus, ClientError> {
        self.call("status", &CampaignParams { campaign_id }).await
    }

    /// Pauses a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn pause(&self, campaign_id: CampaignId) -> Result<RunStatus, ClientError> {
        self.call("pause", &CampaignParams { campaign_id }).await
    }

    /// Resumes a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn resume(&self, campaign_id: CampaignId) -> Result<RunStatus, ClientError> {
        self.call("resume", &CampaignParams { campaign_id }).await
    }

    /// Aborts a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn abort(&self, campaign_id: CampaignId) -> Result<RunStatus, ClientError> {
        self.call("abort", &CampaignParams { campaign_id }).await
    }

    /// Lists every campaign the coordinator knows.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn list(&self) -> Result<Vec<CampaignSummary>, ClientError> {
        self.call("list", &Value::Null).await
    }

    /// Sends one request and decodes the typed reply value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport, protocol, or service failure.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &impl Serialize,
    ) -> Result<T, ClientError> {
        let request = RpcRequest::new(method, params)
            .map_err(|err| ClientError::Json(format!("request serialization failed: {err}")))?;
        let value = self.send(&request).await?;
        serde_json::from_value(value)
            .map_err(|err| ClientError::Protocol(format!("unexpected {method} reply: {err}")))
    }

    /// Sends an envelope and unwraps the reply carrier.
    async fn send(&self, request: &RpcRequest) -> Result<Value, ClientError> {
        let payload = serde_json::to_vec(request)
            .map_err(|err| ClientError::Json(format!("request serialization failed: {err}")))?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let status = response.status();
        let body = read_response_body_with_limit(response, self.max_response_bytes).await?;
        if !status.is_success() {
            return match serde_json::from_slice::<Reply<Value>>(&body) {
                Ok(reply) if !reply.ok => reply.into_result().map_err(ClientError::Service),
                _ => {
                    let preview = String::from_utf8_lossy(&body);
                    Err(ClientError::Transport(format!(
                        "http status {}: {}",
                        status.as_u16(),
                        preview.trim()
                    )))
                }
            };
        }
        let reply: Reply<Value> = serde_json::from_slice(&body)
            .map_err(|err| ClientError::Protocol(format!("invalid reply: {err}")))?;
        reply.into_result().map_err(ClientError::Service)
    }
}

/// Reads a response body, failing once it exceeds `limit` bytes.
async fn read_response_body_with_limit(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ClientError> {
    let mut body = Vec::new();
    let mut total: usize = 0;
    while let Some(chunk) =
        response.chunk().await.map_err(|err| ClientError::Transport(err.to_string()))?
    {
        let next_total = total
            .checked_add(chunk.len())
            .ok_or(ClientError::ResponseTooLarge { actual: usize::MAX, limit })?;
        if next_total > limit {
            return Err(ClientError::ResponseTooLarge { actual: next_total, limit });
        }
        body.extend_from_slice(&chunk);
        total = next_total;
    }
    Ok(body)
}
