use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("io failure: {0}")]
    Io(String),
    #[error("request too large")]
    RequestTooLarge,
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    /// Files already written by the same upload request before it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<Vec<String>>,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidPath(_) => "InvalidPath",
            AppError::InvalidArgument(_) => "InvalidArgument",
            AppError::NotFound(_) => "NotFound",
            AppError::AlreadyExists(_) => "AlreadyExists",
            AppError::Io(_) => "IOFailure",
            AppError::RequestTooLarge => "RequestTooLarge",
            AppError::BadRequest(_) => "BadRequest",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidPath(_) => StatusCode::FORBIDDEN,
            AppError::InvalidArgument(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody { code: self.code(), message: self.to_string(), uploaded: None }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Translates a filesystem error for the entry at `rel` (root-relative, never absolute).
pub fn map_io_error(e: io::Error, rel: &str) -> AppError {
    let shown = if rel.is_empty() { "/" } else { rel };
    if is_missing(&e) {
        return AppError::NotFound(shown.to_string());
    }
    match e.kind() {
        io::ErrorKind::AlreadyExists => AppError::AlreadyExists(shown.to_string()),
        _ => AppError::Io(format!("{shown}: {e}")),
    }
}

/// A path component that is a regular file (`ENOTDIR`) means the entry does not exist.
pub fn is_missing(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
