//! Error taxonomy for the render pipeline and its HTTP translation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::ApiResponse;

pub type Result<T> = std::result::Result<T, RenderError>;

/// Every failure a generate or fetch call can end in.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Missing or contradictory request content, invalid options.
    #[error("{0}")]
    BadRequest(String),

    /// Template tried something the sandbox forbids.
    #[error("security error: {0}")]
    TemplateSecurity(String),

    /// Template syntax errors, undefined variables, missing named templates.
    #[error("template render error: {0}")]
    TemplateRender(String),

    #[error("render timed out after {0}ms")]
    RenderTimeout(u64),

    /// Browser launch, navigation or capture failure.
    #[error("render engine error: {0}")]
    RenderEngine(String),

    /// Upload/download transport or auth failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object does not exist. Not logged as a failure.
    #[error("file not found")]
    NotFound,
}

impl RenderError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::TemplateSecurity(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::TemplateRender(_)
            | Self::RenderTimeout(_)
            | Self::RenderEngine(_)
            | Self::Storage(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the response envelope.
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest(_)
            | Self::TemplateSecurity(_)
            | Self::TemplateRender(_)
            | Self::NotFound => self.to_string(),
            Self::RenderTimeout(_) | Self::RenderEngine(_) | Self::Storage(_) | Self::Io(_) => {
                format!("internal server error: {self}")
            }
        }
    }
}

/// HTTP-facing wrapper; the one place pipeline errors become responses.
#[derive(Debug)]
pub struct ApiError(pub RenderError);

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        match &self.0 {
            RenderError::NotFound => {}
            err if status.is_server_error() => tracing::error!(error = %err, "request failed"),
            err => tracing::info!(error = %err, "request rejected"),
        }

        (status, Json(ApiResponse::failure(self.0.public_message()))).into_response()
    }
}
