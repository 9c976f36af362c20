//! # HTTP API
//!
//! Board and stage cache endpoints under `/api/v1`.

pub mod board;
pub mod cache;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use leadflow_core::{Stage, TransitionError};

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    /// Stable error code, e.g. `lead_busy`
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        let code = err.kind();
        Self::new(status_for(code), code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// HTTP status for a transition error code
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "unknown_lead" => StatusCode::NOT_FOUND,
        "lead_busy" | "validation_blocked_dependency" => StatusCode::CONFLICT,
        "invalid_field" | "validation_missing_fields" => StatusCode::UNPROCESSABLE_ENTITY,
        "gateway_auth_expired" => StatusCode::UNAUTHORIZED,
        "gateway_timeout" => StatusCode::GATEWAY_TIMEOUT,
        "gateway_request_failed" | "gateway_response_invalid" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn parse_stage(raw: &str) -> Result<Stage, ApiError> {
    raw.parse::<Stage>()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "unknown_stage", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_errors_map_to_statuses() {
        let busy: ApiError = TransitionError::LeadBusy("L-1".into()).into();
        assert_eq!(busy.status, StatusCode::CONFLICT);
        assert_eq!(busy.code, "lead_busy");

        let unknown: ApiError = TransitionError::UnknownLead("L-2".into()).into();
        assert_eq!(unknown.status, StatusCode::NOT_FOUND);

        assert_eq!(status_for("cache_write_failed"), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for("gateway_response_invalid"), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_parse_stage() {
        assert_eq!(parse_stage("quotation_shared").unwrap(), Stage::QuotationShared);
        let err = parse_stage("closed_won").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "unknown_stage");
    }
}
