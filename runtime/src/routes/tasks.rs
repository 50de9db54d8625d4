use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    routing::{get, post},
};

use super::{
    ApiError, UploadForm, api_error,
    convert::parse_format,
    types::{CompareResponse, DeleteResponse, TaskListQuery, TaskResultResponse},
};
use crate::{
    AppState,
    comparison::{SubmitComparison, normalize_libraries},
    providers::OutputFormat,
    storage::{TaskPage, TaskSnapshot},
};

pub fn task_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/compare", post(submit_comparison))
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/results/{library}", get(get_result))
}

async fn submit_comparison(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CompareResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_upload()?;
    let format = parse_format(&form)?;
    let libraries = normalize_libraries(form.all("libraries"));

    let snapshot = state
        .comparisons
        .submit(SubmitComparison {
            upload,
            libraries: libraries.clone(),
            format,
        })
        .await
        .map_err(api_error)?;

    Ok(Json(CompareResponse {
        task_id: snapshot.task.task_id,
        status: snapshot.task.status,
        libraries,
    }))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskPage>, ApiError> {
    state
        .comparisons
        .list(query.page, query.page_size)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    state
        .comparisons
        .task(&task_id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn get_result(
    State(state): State<Arc<AppState>>,
    Path((task_id, library)): Path<(String, String)>,
) -> Result<Json<TaskResultResponse>, ApiError> {
    let stored = state
        .comparisons
        .result(&task_id, &library)
        .await
        .map_err(api_error)?;

    let (content, data) = match stored.format {
        OutputFormat::Json => match serde_json::from_slice(&stored.bytes) {
            Ok(value) => (None, Some(value)),
            Err(_) => (Some(String::from_utf8_lossy(&stored.bytes).into_owned()), None),
        },
        _ => (Some(String::from_utf8_lossy(&stored.bytes).into_owned()), None),
    };

    Ok(Json(TaskResultResponse {
        task_id,
        library: stored.library,
        format: stored.format,
        content,
        data,
    }))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state
        .comparisons
        .delete(&task_id)
        .await
        .map_err(api_error)?;
    Ok(Json(DeleteResponse { task_id, deleted }))
}
