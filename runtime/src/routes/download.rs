use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{Response, StatusCode, header},
    routing::get,
};

use super::{ApiError, api_error};
use crate::AppState;

pub fn download_routes() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/{id}/download", get(download_bundle))
}

async fn download_bundle(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Response<Body>, ApiError> {
    let (filename, archive) = state
        .comparisons
        .bundle(&task_id)
        .await
        .map_err(api_error)?;

    Response::builder()
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, archive.len())
        .body(Body::from(archive))
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error in sending response {err}"),
            )
        })
}
