use axum::{Json, Router, body::Body, extract::{Path, State, rejection::JsonRejection}, http::{StatusCode, header}, response::{IntoResponse, Response}, routing::{get, post}};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::{coordinator::{RenderCoordinator, RenderOutput}, error::{ApiError, RenderError}, models::{ApiResponse, GenerateRequest}};

/// Read size when streaming stored objects back to clients.
const FETCH_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RenderCoordinator>,
}

/// Routes are served at the root and again under `/text2img`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/generate", post(generate))
        .route("/data/*path", get(fetch_image));

    Router::new()
        .route("/health", get(health))
        .merge(api.clone())
        .nest("/text2img", api)
        .with_state(state)
}

pub async fn generate(State(state): State<AppState>, payload: Result<Json<GenerateRequest>, JsonRejection>) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(|e| RenderError::BadRequest(e.body_text()))?;

    match state.coordinator.generate(body).await? {
        RenderOutput::Stored { id } => Ok(Json(ApiResponse::success(id)).into_response()),
        RenderOutput::File(file) => {
            let media_type = file.media_type();
            let (stream, len) = file.into_stream().await?;
            Ok((
                [(header::CONTENT_TYPE, media_type.to_string()), (header::CONTENT_LENGTH, len.to_string())],
                Body::from_stream(stream),
            ).into_response())
        }
    }
}

pub async fn fetch_image(Path(path): Path<String>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let fetched = state.coordinator.fetch(&path).await?;

    let mut headers = axum::http::HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static(fetched.media_type));
    if let Some(len) = fetched.object.content_length {
        headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(len));
    }
    let stream = ReaderStream::with_capacity(fetched.object.reader, FETCH_CHUNK_SIZE);
    Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}
