// crates/calib-server/src/rpc.rs
// ============================================================================
// Module: RPC Envelope
// Description: `{method, params}` request decoding and service dispatch.
// Purpose: Map the thin JSON envelope onto CalibrationService operations.
// Dependencies: calib-core, serde, serde_json
// ============================================================================

//! ## Overview
//! A request names one service operation and carries its parameters as a
//! JSON object. Every answer is a [`Reply`] carrier. Malformed envelopes and
//! parameters are `operator` errors; they never reach the service.

// ============================================================================
// SECTION: Imports
// ============================================================================

use calib_core::CalibrationService;
use calib_core::CampaignId;
use calib_core::CampaignRequest;
use calib_core::Payload;
use calib_core::Reply;
use calib_core::ServiceError;
use calib_core::SliceIndex;
use calib_core::StepCursor;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Incoming request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Operation name.
    pub method: String,
    /// Operation parameters.
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Builds a request from typed parameters.
    ///
    /// # Errors
    ///
    /// Returns an error when the parameters cannot be encoded.
    pub fn new(
        method: impl Into<String>,
        params: &impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self { method: method.into(), params: serde_json::to_value(params)? })
    }
}

/// Parameters naming one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignParams {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
}

/// Parameters of `get_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputParams {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
    /// Slice requesting its input.
    pub slice: SliceIndex,
}

/// Parameters of `submit_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultParams {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
    /// Reporting slice.
    pub slice: SliceIndex,
    /// Cursor echoed from the worker input.
    pub cursor: StepCursor,
    /// Worker result.
    pub payload: Payload,
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Runs one request against the service.
#[must_use]
pub fn dispatch(service: &CalibrationService, request: RpcRequest) -> Reply<Value> {
    let params = request.params;
    let result = match request.method.as_str() {
        "create_run" => decode::<CampaignRequest>(params)
            .and_then(|request| encode(service.create_run(request))),
        "get_input" => decode::<InputParams>(params)
            .and_then(|p| encode(service.get_input_for_worker(p.campaign_id, p.slice))),
        "submit_result" => decode::<ResultParams>(params).and_then(|p| {
            encode(service.submit_result(p.campaign_id, p.slice, p.cursor, p.payload))
        }),
        "status" => campaign(params).and_then(|id| encode(service.status(id))),
        "pause" => campaign(params).and_then(|id| encode(service.pause(id))),
        "resume" => campaign(params).and_then(|id| encode(service.resume(id))),
        "abort" => campaign(params).and_then(|id| encode(service.abort(id))),
        "list" => encode(service.list()),
        other => Err(ServiceError::operator(format!("unknown method: {other}"))),
    };
    Reply::from(result)
}

/// Decodes a request body into an envelope.
///
/// # Errors
///
/// Returns an `operator` error for malformed JSON.
pub fn parse_request(bytes: &[u8]) -> Result<RpcRequest, ServiceError> {
    serde_json::from_slice(bytes)
        .map_err(|err| ServiceError::operator(format!("invalid rpc request: {err}")))
}

/// Decodes typed parameters.
fn decode<T: DeserializeOwned>(params: Value) -> Result<T, ServiceError> {
    serde_json::from_value(params)
        .map_err(|err| ServiceError::operator(format!("invalid params: {err}")))
}

/// Decodes the campaign named by a [`CampaignParams`] body.
fn campaign(params: Value) -> Result<CampaignId, ServiceError> {
    decode::<CampaignParams>(params).map(|params| params.campaign_id)
}

/// Encodes an operation result.
fn encode<T: Serialize>(result: Result<T, ServiceError>) -> Result<Value, ServiceError> {
    let value = result?;
    serde_json::to_value(value)
        .map_err(|err| ServiceError::internal(format!("serialization failed: {err}")))
}
