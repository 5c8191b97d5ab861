//! Service and per-chain health.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use subwatch_core::{ChainId, HealthReport};

use super::{ApiError, ApiResponse, ApiResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceHealth {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    connected_chains: usize,
    connected_viewers: usize,
}

pub(crate) async fn service_health(State(state): State<AppState>) -> ApiResult<ServiceHealth> {
    Ok(Json(ApiResponse::ok(ServiceHealth {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        connected_chains: state.registry.len().await,
        connected_viewers: state.hub.viewer_count().await,
    })))
}

/// Healthy while connected and the latest block is younger than the
/// configured multiple of the chain's block time.
pub(crate) async fn chain_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<HealthReport> {
    let conn = state
        .registry
        .get(&ChainId::from(id))
        .await
        .ok_or_else(|| ApiError::NotFound("Chain not found".to_string()))?;
    let multiplier = state.registry.config().health_block_multiplier;
    Ok(Json(ApiResponse::ok(conn.health(multiplier).await)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use subwatch_core::{ChainEndpointRequest, HealthStatus};

    use super::*;
    use crate::fanout::ViewerHub;
    use crate::testing::{FakeConnector, TEST_URL, test_registry};

    #[tokio::test]
    async fn test_service_health_counts() {
        let registry = test_registry(FakeConnector::new());
        let hub = Arc::new(ViewerHub::new(registry.clone()));
        registry
            .connect(ChainEndpointRequest::new(TEST_URL))
            .await
            .unwrap();
        let _viewer = hub.register().await;

        let Json(response) = service_health(State(AppState::new(registry, hub)))
            .await
            .unwrap();
        let health = response.data.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.connected_chains, 1);
        assert_eq!(health.connected_viewers, 1);
    }

    #[tokio::test]
    async fn test_chain_health_goes_stale() {
        let connector = FakeConnector::new();
        let registry = test_registry(connector.clone());
        let hub = Arc::new(ViewerHub::new(registry.clone()));
        let conn = registry
            .connect(ChainEndpointRequest::new(TEST_URL))
            .await
            .unwrap();
        let state = AppState::new(registry, hub);

        let Json(response) = chain_health(State(state.clone()), Path(conn.id().to_string()))
            .await
            .unwrap();
        let report = response.data.unwrap();
        assert!(report.is_connected);
        assert_eq!(report.status, HealthStatus::Healthy);

        // Fake block timestamps are years in the past
        connector.last_rpc().push_head(10);
        assert!(wait_for!(conn.latest_block().await.is_some()));

        let Json(response) = chain_health(State(state), Path(conn.id().to_string()))
            .await
            .unwrap();
        let report = response.data.unwrap();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.latest_block_number, 10);
    }

    #[tokio::test]
    async fn test_chain_health_unknown() {
        let registry = test_registry(FakeConnector::new());
        let hub = Arc::new(ViewerHub::new(registry.clone()));
        let err = chain_health(State(AppState::new(registry, hub)), Path("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
