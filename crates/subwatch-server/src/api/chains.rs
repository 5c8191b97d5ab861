//! `/api/chains` handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use subwatch_core::{
    BlockRecord, ChainEndpointRequest, ChainId, ChainMetadata, ChainSummary, NetworkStats, Page,
    ValidatorSummary,
};

use super::{ApiError, ApiResponse, ApiResult, AppState};
use crate::connection::ChainConnection;

const DEFAULT_BLOCK_LIMIT: usize = 10;
const MAX_BLOCK_LIMIT: usize = 50;
const DEFAULT_VALIDATOR_PAGE_SIZE: usize = 50;
const MAX_VALIDATOR_PAGE_SIZE: usize = 100;

async fn lookup(state: &AppState, id: &str) -> Result<Arc<ChainConnection>, ApiError> {
    state
        .registry
        .get(&ChainId::from(id))
        .await
        .ok_or_else(|| ApiError::NotFound("Chain not found".to_string()))
}

pub(crate) async fn list_chains(State(state): State<AppState>) -> ApiResult<Vec<ChainSummary>> {
    Ok(Json(ApiResponse::ok(state.registry.list().await)))
}

pub(crate) async fn connect_chain(
    State(state): State<AppState>,
    body: Result<Json<ChainEndpointRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<ChainMetadata>>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (conn, created) = state.registry.connect_or_reuse(request).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ApiResponse::ok(conn.metadata().clone()))))
}

pub(crate) async fn get_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ChainMetadata> {
    let conn = lookup(&state, &id).await?;
    Ok(Json(ApiResponse::ok(conn.metadata().clone())))
}

pub(crate) async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<NetworkStats> {
    let conn = lookup(&state, &id).await?;
    let stats = conn
        .stats()
        .await
        .ok_or_else(|| ApiError::NotFound("Stats not available yet".to_string()))?;
    Ok(Json(ApiResponse::ok((*stats).clone())))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BlocksQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

pub(crate) async fn get_blocks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BlocksQuery>,
) -> ApiResult<Page<BlockRecord>> {
    let conn = lookup(&state, &id).await?;
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_BLOCK_LIMIT)
        .min(MAX_BLOCK_LIMIT);
    let page = query.page.unwrap_or(1).max(1);
    Ok(Json(ApiResponse::ok(conn.block_page(page, limit).await)))
}

pub(crate) async fn disconnect_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ChainId> {
    let id = ChainId::from(id);
    state.registry.disconnect(&id).await?;
    Ok(Json(ApiResponse::ok(id)))
}

pub(crate) async fn reconnect_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ChainMetadata> {
    let conn = state.registry.reconnect(&ChainId::from(id)).await?;
    Ok(Json(ApiResponse::ok(conn.metadata().clone())))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ValidatorsQuery {
    page_size: Option<usize>,
    page_index: Option<usize>,
}

/// Active validators of the current session, one page at a time.
/// Chains without staking or session modules return an empty list.
pub(crate) async fn get_validators(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ValidatorsQuery>,
) -> ApiResult<Vec<ValidatorSummary>> {
    let conn = lookup(&state, &id).await?;
    let metadata = conn.metadata();
    if !metadata.capabilities.has_validator_set() {
        return Ok(Json(ApiResponse::ok(Vec::new())));
    }

    let page_size = query
        .page_size
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_VALIDATOR_PAGE_SIZE)
        .min(MAX_VALIDATOR_PAGE_SIZE);
    let offset = query.page_index.unwrap_or(0).saturating_mul(page_size);

    let timeout = state.registry.config().stats_query_timeout;
    let fetch = conn
        .rpc()
        .active_validators(offset, page_size, metadata.ss58_format);

    match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok(validators)) => Ok(Json(ApiResponse::ok(validators))),
        Ok(Err(e)) => {
            tracing::warn!("Failed to fetch validators for {}: {}", conn.id(), e);
            Err(ApiError::Internal("Failed to fetch validators".to_string()))
        }
        Err(_) => {
            tracing::warn!("Fetching validators for {} timed out", conn.id());
            Err(ApiError::Internal("Timed out fetching validators".to_string()))
        }
    }
}
