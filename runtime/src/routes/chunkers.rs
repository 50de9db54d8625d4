use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};

use super::{
    ApiError, api_error,
    types::{ChunkRequest, ChunkersResponse},
};
use crate::{AppState, chunkers::ChunkingResult};

pub fn chunker_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chunkers", get(list_chunkers))
        .route("/chunk", post(chunk_text))
}

async fn list_chunkers(State(state): State<Arc<AppState>>) -> Json<ChunkersResponse> {
    Json(ChunkersResponse {
        chunkers: state.chunkers.list(),
    })
}

async fn chunk_text(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChunkRequest>,
) -> Result<Json<ChunkingResult>, ApiError> {
    let result = state
        .comparisons
        .chunk(&request.chunker, request.text, &request.params)
        .await
        .map_err(api_error)?;
    Ok(Json(result))
}
