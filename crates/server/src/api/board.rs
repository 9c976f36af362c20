//! # Board API
//!
//! Kanban board, per-lead validation and stage moves.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use leadflow_core::stages::StageDefinition;
use leadflow_core::{BoardColumn, DropOutcome, ExtraFields, ValidationResult};

use super::{parse_stage, status_for, ApiError, ErrorResponse};
use crate::SharedState;

#[derive(Debug, Serialize, ToSchema)]
pub struct BoardResponse {
    /// Columns in pipeline order
    #[schema(value_type = Vec<Object>)]
    pub columns: Vec<BoardColumn>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub success: bool,
    pub leads: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ValidateQuery {
    /// Target stage id, e.g. `quotation_shared`
    pub stage: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub lead_id: String,
    pub stage: String,
    #[schema(value_type = Object)]
    pub result: ValidationResult,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MoveRequest {
    /// Target stage id
    pub stage: String,
    /// Values collected from a field prompt, keyed by camelCase field name
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub fields: Option<ExtraFields>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StagesResponse {
    #[schema(value_type = Vec<Object>)]
    pub stages: Vec<StageDefinition>,
}

/// Get the board
#[utoipa::path(
    get,
    path = "/api/v1/board",
    tag = "board",
    responses(
        (status = 200, description = "Board columns with card badges", body = BoardResponse)
    )
)]
pub async fn get_board(State(state): State<SharedState>) -> Json<BoardResponse> {
    let columns = state.board.columns();
    let total = columns.iter().map(|column| column.cards.len()).sum();
    Json(BoardResponse { columns, total })
}

/// Reload leads from the backend and re-apply the stage cache
#[utoipa::path(
    post,
    path = "/api/v1/board/refresh",
    tag = "board",
    responses(
        (status = 200, description = "Board reloaded", body = RefreshResponse),
        (status = 502, description = "Lead directory unavailable", body = ErrorResponse)
    )
)]
pub async fn refresh_board(State(state): State<SharedState>) -> Result<Json<RefreshResponse>, ApiError> {
    let leads = state.board.load().await.map_err(|e| {
        tracing::warn!(error = %e, "Board refresh failed");
        ApiError::new(StatusCode::BAD_GATEWAY, "lead_directory_unavailable", format!("{:#}", e))
    })?;
    Ok(Json(RefreshResponse {
        success: true,
        leads,
    }))
}

/// Check whether a lead could enter a stage
#[utoipa::path(
    get,
    path = "/api/v1/leads/{id}/validate",
    tag = "board",
    params(
        ("id" = String, Path, description = "Lead id"),
        ValidateQuery
    ),
    responses(
        (status = 200, description = "Validation result", body = ValidationResponse),
        (status = 400, description = "Unknown stage", body = ErrorResponse),
        (status = 404, description = "Lead not on the board", body = ErrorResponse)
    )
)]
pub async fn validate_lead(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ValidateQuery>,
) -> Result<Json<ValidationResponse>, ApiError> {
    let stage = parse_stage(&query.stage)?;
    let result = state.board.orchestrator().validate(&id, stage)?;
    Ok(Json(ValidationResponse {
        lead_id: id,
        stage: stage.to_string(),
        result,
    }))
}

/// Move a lead to a stage
///
/// The body of every response is a drop outcome tagged by `outcome`:
/// `moved`, `unchanged`, `needs_fields` (with a form schema), `refused` or
/// `failed`.
#[utoipa::path(
    post,
    path = "/api/v1/leads/{id}/move",
    tag = "board",
    params(("id" = String, Path, description = "Lead id")),
    request_body = MoveRequest,
    responses(
        (status = 200, description = "Moved or unchanged", body = serde_json::Value),
        (status = 409, description = "Blocked by a missing predecessor or a move in flight", body = serde_json::Value),
        (status = 422, description = "Fields required", body = serde_json::Value),
        (status = 502, description = "Backend rejected the stage entity", body = serde_json::Value)
    )
)]
pub async fn move_lead(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<MoveRequest>,
) -> Result<Response, ApiError> {
    let stage = parse_stage(&req.stage)?;
    let outcome = match &req.fields {
        Some(fields) if !fields.is_empty() => state.board.submit_fields(&id, stage, fields).await,
        _ => state.board.drop_card(&id, stage).await,
    };
    Ok((outcome_status(&outcome), Json(outcome)).into_response())
}

/// List the pipeline definition
#[utoipa::path(
    get,
    path = "/api/v1/stages",
    tag = "board",
    responses(
        (status = 200, description = "Stages in order", body = StagesResponse)
    )
)]
pub async fn list_stages(State(state): State<SharedState>) -> Json<StagesResponse> {
    let stages = state.board.orchestrator().registry().definitions().to_vec();
    Json(StagesResponse { stages })
}

fn outcome_status(outcome: &DropOutcome) -> StatusCode {
    match outcome {
        DropOutcome::Moved(_) | DropOutcome::Unchanged { .. } => StatusCode::OK,
        DropOutcome::NeedsFields(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DropOutcome::Refused { .. } => StatusCode::CONFLICT,
        DropOutcome::Failed { kind, .. } => status_for(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::{FieldPrompt, LeadField, Stage};

    #[test]
    fn test_outcome_status() {
        let prompt = FieldPrompt::new("L-1", Stage::Opportunity, &[LeadField::Region]);
        assert_eq!(
            outcome_status(&DropOutcome::NeedsFields(prompt)),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let failed = DropOutcome::Failed {
            lead_id: "L-1".to_string(),
            kind: "gateway_timeout",
            message: "timed out".to_string(),
            retryable: true,
            session_expired: false,
        };
        assert_eq!(outcome_status(&failed), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_move_request_accepts_fields() {
        let req: MoveRequest = serde_json::from_value(serde_json::json!({
            "stage": "opportunity",
            "fields": { "quantity": 100, "region": "APAC" }
        }))
        .unwrap();
        assert_eq!(req.fields.map(|f| f.len()), Some(2));
    }
}
