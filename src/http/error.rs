use crate::error::ServiceError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Error returned by HTTP handlers, rendered as a JSON body
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct AppError {
    pub status_code: u16,
    pub message: String,
    /// Root cause, for operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// Machine-readable error key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl AppError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status_code: status.as_u16(),
            message: message.into(),
            log: None,
            key: None,
        }
    }

    pub fn with_log<S: Into<String>>(mut self, log: S) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn with_key<S: Into<String>>(mut self, key: S) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unprocessable_entity<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        Self::internal().with_log(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                "{} {}: {}",
                status.as_u16(),
                self.message,
                self.log.as_deref().unwrap_or("-")
            );
        }
        (status, Json(self)).into_response()
    }
}
