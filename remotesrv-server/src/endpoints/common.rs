//! Common types and utilities for API endpoints.

use std::error::Error;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Errors indicating malformed or illegal requests.
    #[error("client error: {0}")]
    Client(String),

    /// A write operation on a read-only server.
    #[error("server is read-only")]
    ReadOnly,

    /// The requested resource does not exist.
    #[error("not found")]
    NotFound,

    /// Server errors, indicating that something went wrong when receiving or executing a request.
    #[error("server error: {0}")]
    Server(#[source] Box<dyn Error + Send + Sync>),
}

impl From<remotesrv_service::Error> for ApiError {
    fn from(err: remotesrv_service::Error) -> Self {
        match err {
            remotesrv_service::Error::InvalidHash(_)
            | remotesrv_service::Error::PathEscapesRoot(_)
            | remotesrv_service::Error::MissingChunk(_) => ApiError::Client(err.to_string()),
            err => ApiError::Server(Box::new(err)),
        }
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// A JSON error response returned by the API.
#[derive(Serialize, Deserialize, Debug)]
pub struct ApiErrorResponse {
    /// The main error message.
    #[serde(default)]
    pub detail: Option<String>,
    /// Chain of error causes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ApiErrorResponse {
    /// Creates an error response from an error, extracting the full cause chain.
    pub fn from_error<E: Error + ?Sized>(error: &E) -> Self {
        let detail = Some(error.to_string());

        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(s) = source {
            causes.push(s.to_string());
            source = s.source();
        }

        Self { detail, causes }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Client(_) => StatusCode::BAD_REQUEST,
            ApiError::ReadOnly => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Server(_) => {
                tracing::error!(
                    error = &self as &dyn Error,
                    "error handling request"
                );
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ApiErrorResponse::from_error(&self);
        (status, Json(body)).into_response()
    }
}
