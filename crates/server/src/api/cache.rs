//! # Stage Cache API
//!
//! Inspect and clear the local lead → stage entity links.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use leadflow_core::state::StageCacheEntry;
use leadflow_core::TransitionError;

use super::{ApiError, ErrorResponse};
use crate::SharedState;

#[derive(Debug, Serialize, ToSchema)]
pub struct CacheListResponse {
    #[schema(value_type = Vec<Object>)]
    pub entries: Vec<StageCacheEntry>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CacheClearResponse {
    pub success: bool,
    /// Number of entries removed
    pub removed: usize,
}

/// List every stage cache entry
#[utoipa::path(
    get,
    path = "/api/v1/cache",
    tag = "cache",
    responses(
        (status = 200, description = "All cached entries", body = CacheListResponse),
        (status = 500, description = "Cache unavailable", body = ErrorResponse)
    )
)]
pub async fn list_cache(State(state): State<SharedState>) -> Result<Json<CacheListResponse>, ApiError> {
    let entries = state
        .board
        .orchestrator()
        .cache()
        .list()
        .map_err(|e| TransitionError::CacheUnavailable(format!("{:#}", e)))?;
    let total = entries.len();
    Ok(Json(CacheListResponse { entries, total }))
}

/// Clear the whole stage cache
#[utoipa::path(
    delete,
    path = "/api/v1/cache",
    tag = "cache",
    responses(
        (status = 200, description = "Cache cleared", body = CacheClearResponse),
        (status = 500, description = "Cache unavailable", body = ErrorResponse)
    )
)]
pub async fn clear_cache(State(state): State<SharedState>) -> Result<Json<CacheClearResponse>, ApiError> {
    let removed = state.board.orchestrator().clear_all()?;
    Ok(Json(CacheClearResponse {
        success: true,
        removed,
    }))
}

/// Clear the stage cache entry of one lead
#[utoipa::path(
    delete,
    path = "/api/v1/cache/{id}",
    tag = "cache",
    params(("id" = String, Path, description = "Lead id")),
    responses(
        (status = 200, description = "Entry cleared (removed = 0 if there was none)", body = CacheClearResponse),
        (status = 500, description = "Cache unavailable", body = ErrorResponse)
    )
)]
pub async fn clear_cache_entry(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<CacheClearResponse>, ApiError> {
    let removed = state.board.orchestrator().clear_cache(&id)?;
    Ok(Json(CacheClearResponse {
        success: true,
        removed: usize::from(removed),
    }))
}
