//! System endpoints

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::{DataResponse, SystemInfo, VersionInfo};
use crate::system;
use crate::AppState;

pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<DataResponse<SystemInfo>> {
    let info = system::system_info(
        &state.store,
        &state.config.data_dir,
        state.container_manager.runtime().isolation(),
    )
    .await;
    Json(DataResponse::new(info))
}

pub async fn version() -> Json<DataResponse<VersionInfo>> {
    Json(DataResponse::new(system::version_info()))
}
