use axum::{
    Json,
    extract::rejection::BytesRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::providers::streaming::{FailureKind, UpstreamFailure};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("{0}")]
    UpstreamRejected(String),

    #[error("{0}")]
    UpstreamTimeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BridgeError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            BridgeError::UpstreamUnavailable(_) | BridgeError::UpstreamRejected(_) => {
                StatusCode::BAD_GATEWAY
            }
            BridgeError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Http(_)
            | BridgeError::Io(_)
            | BridgeError::Toml(_)
            | BridgeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                code: self.status_code().as_u16(),
            },
        }
    }
}

/// `{"error": {"message": ..., "code": ...}}`
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    pub code: u16,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<UpstreamFailure> for BridgeError {
    fn from(failure: UpstreamFailure) -> Self {
        match failure.kind {
            FailureKind::Unavailable => BridgeError::UpstreamUnavailable(failure.message),
            FailureKind::Rejected => BridgeError::UpstreamRejected(failure.message),
            FailureKind::Timeout => BridgeError::UpstreamTimeout(failure.message),
        }
    }
}

impl From<BytesRejection> for BridgeError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            BridgeError::PayloadTooLarge(rejection.body_text())
        } else {
            BridgeError::MalformedRequest(rejection.body_text())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_taxonomy() {
        assert_eq!(
            BridgeError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            BridgeError::MalformedRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BridgeError::PayloadTooLarge("x".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            BridgeError::UpstreamRejected("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            BridgeError::UpstreamTimeout("x".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn upstream_failure_keeps_its_message() {
        let err: BridgeError = UpstreamFailure::rejected("Cannot access private bot: Foo").into();
        let body = err.body();
        assert_eq!(body.error.code, 502);
        assert_eq!(body.error.message, "Cannot access private bot: Foo");
    }
}
