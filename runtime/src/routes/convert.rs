use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::post,
};
use serde_json::{Map, Value};
use tracing::info;

use super::{
    ApiError, UploadForm, api_error, bad_request,
    types::{ConvertChunkResponse, ConvertResponse},
};
use crate::{
    AppState,
    providers::{ConvertedContent, OutputFormat},
};

pub fn convert_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert", post(convert_pdf))
        .route("/convert-chunk", post(convert_and_chunk))
}

pub(crate) fn parse_format(form: &UploadForm) -> Result<OutputFormat, ApiError> {
    form.text("output_format")
        .unwrap_or("markdown")
        .parse::<OutputFormat>()
        .map_err(bad_request)
}

async fn convert_pdf(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ConvertResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_upload()?;
    let library = form.required("library")?.trim().to_string();
    let format = parse_format(&form)?;

    info!(library = %library, format = %format, filename = %upload.filename, "Starting conversion");
    let conversion = state
        .comparisons
        .convert_upload(&upload, &library, format)
        .await
        .map_err(api_error)?;
    info!(
        library = %library,
        duration_seconds = conversion.duration_seconds,
        "Conversion successful"
    );

    let (content, data) = match conversion.content {
        ConvertedContent::Text(text) => (Some(text), None),
        ConvertedContent::Json(value) => (None, Some(value)),
    };

    Ok(Json(ConvertResponse {
        success: true,
        library_used: library,
        filename: upload.filename,
        format,
        duration_seconds: conversion.duration_seconds,
        content,
        data,
    }))
}

async fn convert_and_chunk(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ConvertChunkResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_upload()?;
    let library = form.required("library")?.trim().to_string();
    let chunker = form.required("chunker")?.trim().to_string();
    let format = parse_format(&form)?;
    let params = match form.text("params").map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => serde_json::from_str::<Map<String, Value>>(raw)
            .map_err(|err| bad_request(format!("params must be a JSON object: {err}")))?,
        None => Map::new(),
    };

    let result = state
        .comparisons
        .convert_and_chunk(&upload, &library, format, &chunker, &params)
        .await
        .map_err(api_error)?;

    Ok(Json(ConvertChunkResponse {
        success: true,
        library_used: library,
        filename: upload.filename,
        format,
        conversion_duration_seconds: result.conversion.duration_seconds,
        chunking: result.chunking,
    }))
}
