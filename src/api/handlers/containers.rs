//! Container endpoints

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::api::ApiError;
use crate::container::Container;
use crate::models::{CreateContainerRequest, DataResponse, LogsQuery, StopQuery};
use crate::AppState;

/// List all containers
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
) -> Json<DataResponse<Vec<Container>>> {
    Json(DataResponse::new(state.container_manager.list().await))
}

/// Create a container in the `created` state
pub async fn create_container(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateContainerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DataResponse<Container>>), ApiError> {
    let Json(request) = payload?;
    let container = state.container_manager.create(request).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(container))))
}

pub async fn inspect_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Container>>, ApiError> {
    let container = state.container_manager.inspect(&id).await?;
    Ok(Json(DataResponse::new(container)))
}

pub async fn start_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Container>>, ApiError> {
    let container = state.container_manager.start(&id).await?;
    Ok(Json(DataResponse::new(container)))
}

pub async fn stop_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<StopQuery>, QueryRejection>,
) -> Result<Json<DataResponse<Container>>, ApiError> {
    let Query(query) = query?;
    let grace = query.timeout.map(Duration::from_secs);
    let container = state.container_manager.stop(&id, grace).await?;
    Ok(Json(DataResponse::new(container)))
}

pub async fn restart_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<StopQuery>, QueryRejection>,
) -> Result<Json<DataResponse<Container>>, ApiError> {
    let Query(query) = query?;
    let grace = query.timeout.map(Duration::from_secs);
    let container = state.container_manager.restart(&id, grace).await?;
    Ok(Json(DataResponse::new(container)))
}

/// Remove a stopped or never-started container
pub async fn remove_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.container_manager.remove(&id).await?;
    info!(container = %id, "Container removed via API");
    Ok(StatusCode::NO_CONTENT)
}

/// Chunked log output; follows a running container until it stops
pub async fn container_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let stream = state.container_manager.logs(&id, query.follow).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}
