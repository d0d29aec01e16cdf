// src/error.rs
// Crate-wide error taxonomy (spec §7) and its HTTP mapping.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use thiserror::Error;

/// The error kinds every storage and capture operation maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyExists,
    Io,
    Database,
    Integrity,
    Serialization,
    Encryption,
    Unavailable,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::Io => "IO",
            ErrorKind::Database => "Database",
            ErrorKind::Integrity => "Integrity",
            ErrorKind::Serialization => "Serialization",
            ErrorKind::Encryption => "Encryption",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

/// The crate-wide error type. Every fallible operation in the storage engine,
/// capture pipeline, and HTTP layer returns `Result<T, AppError>`.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<anyhow::Error>,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(kind: ErrorKind, message: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, msg)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, msg)
    }

    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encryption, msg)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => AppError::new(ErrorKind::NotFound, "row not found"),
            _ => AppError::with_cause(ErrorKind::Database, "database operation failed", e),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::with_cause(ErrorKind::Io, "filesystem operation failed", e)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::with_cause(ErrorKind::Serialization, "(de)serialization failed", e)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::with_cause(ErrorKind::Unavailable, "AI service request failed", e)
    }
}

/// JSON error body returned to HTTP clients: `{"error": "<kind>: <message>"}`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            // Callers that want graceful degradation (search) intercept `Unavailable`
            // before it reaches this conversion; anything that falls through here
            // (e.g. chat) is a genuine failure from the HTTP client's perspective.
            ErrorKind::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Io | ErrorKind::Database | ErrorKind::Integrity | ErrorKind::Serialization
            | ErrorKind::Encryption | ErrorKind::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({ "error": format!("{}", self) }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
