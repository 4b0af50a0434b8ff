//! Network endpoints

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

use crate::api::ApiError;
use crate::models::{CreateNetworkRequest, DataResponse};
use crate::network::{Network, NetworkDetails};
use crate::AppState;

pub async fn list_networks(
    State(state): State<Arc<AppState>>,
) -> Json<DataResponse<Vec<NetworkDetails>>> {
    Json(DataResponse::new(state.network_manager.list().await))
}

pub async fn inspect_network(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DataResponse<NetworkDetails>>, ApiError> {
    let details = state.network_manager.inspect(&name).await?;
    Ok(Json(DataResponse::new(details)))
}

/// Create a bridge network; the subnet is chosen when omitted
pub async fn create_network(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateNetworkRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DataResponse<Network>>), ApiError> {
    let Json(request) = payload?;
    let network = state
        .network_manager
        .create_network(
            request.name.trim(),
            request.driver.as_deref(),
            request.subnet.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(network))))
}

/// Remove a network with no attached containers
pub async fn remove_network(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.network_manager.remove_network(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
