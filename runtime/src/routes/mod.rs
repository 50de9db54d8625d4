use std::{collections::HashMap, sync::Arc};

use axum::{Json, Router, extract::Multipart, http::StatusCode, routing::get};
use tracing::{error, warn};

use crate::{
    AppState,
    comparison::Upload,
    error::{ErrorKind, StractError},
};

pub mod chunkers;
pub mod convert;
pub mod download;
pub mod libraries;
pub mod tasks;

pub mod types;

pub use chunkers::chunker_routes;
pub use convert::convert_routes;
pub use download::download_routes;
pub use libraries::library_routes;
pub use tasks::task_routes;

pub type ApiError = (StatusCode, String);

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InvalidParameter => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ConversionFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::PreparationFailed
        | ErrorKind::OrchestrationFailed
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn api_error(err: StractError) -> ApiError {
    let status = status_for(err.kind());
    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "Request failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "Request rejected");
    }
    (status, err.to_string())
}

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}

/// A multipart form with at most one `file` part and any number of text fields.
#[derive(Default)]
pub(crate) struct UploadForm {
    pub upload: Option<Upload>,
    fields: HashMap<String, Vec<String>>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| bad_request(format!("invalid multipart payload: {err}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == "file" {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| bad_request("uploaded file missing filename"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| bad_request(format!("failed to read upload field: {err}")))?;
                form.upload = Some(Upload::new(filename, bytes.to_vec()));
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|err| bad_request(format!("failed to read field '{name}': {err}")))?;
                form.fields.entry(name).or_default().push(value);
            }
        }

        Ok(form)
    }

    pub fn take_upload(&mut self) -> Result<Upload, ApiError> {
        self.upload
            .take()
            .ok_or_else(|| bad_request("missing file field in multipart payload"))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn required(&self, name: &str) -> Result<&str, ApiError> {
        self.text(name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| bad_request(format!("missing form field '{name}'")))
    }

    pub fn all(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<types::HealthResponse> {
    Json(types::HealthResponse {
        status: "healthy".to_string(),
    })
}
