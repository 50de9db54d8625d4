use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use tracing::info;

use super::{
    ApiError, api_error,
    types::{LibrariesResponse, PrepareResponse},
};
use crate::AppState;

pub fn library_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/libraries", get(list_libraries))
        .route("/libraries/{name}/prepare", post(prepare_library))
}

async fn list_libraries(State(state): State<Arc<AppState>>) -> Json<LibrariesResponse> {
    Json(LibrariesResponse {
        libraries: state.converters.list(),
    })
}

async fn prepare_library(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<PrepareResponse>, ApiError> {
    info!(library = %name, "Preparation requested");
    let outcome = state
        .converters
        .prepare(&name)
        .await
        .map_err(|err| api_error(err.into()))?;

    Ok(Json(PrepareResponse {
        success: true,
        message: outcome.message(&name),
        library: name,
    }))
}
