//! API error handling
//!
//! Errors are classified once, where they occur, and carry the operation tag
//! of the code that produced them. Only the classification and a generic
//! message ever reach the client; causes stay in the server log.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Error body inside the response envelope
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error classification (BAD_REQUEST, CONFLICT, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

/// `{ "success": false, "error": { ... } }`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ApiError,
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input or a business rule rejection
    #[error("[{op}] {message}")]
    Validation { message: String, op: &'static str },

    /// Duplicate unique key
    #[error("[{op}] {message}")]
    Conflict { message: String, op: &'static str },

    /// Entity absent
    #[error("[{op}] {message}")]
    NotFound { message: String, op: &'static str },

    #[error("[{op}] unauthorized")]
    Unauthorized { op: &'static str },

    #[error("[{op}] forbidden")]
    Forbidden { op: &'static str },

    /// Anything unexpected; the source is logged and never rendered
    #[error("[{op}] internal error: {source:#}")]
    Internal {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>, op: &'static str) -> Self {
        Self::Validation {
            message: message.into(),
            op,
        }
    }

    pub fn conflict(message: impl Into<String>, op: &'static str) -> Self {
        Self::Conflict {
            message: message.into(),
            op,
        }
    }

    pub fn not_found(message: impl Into<String>, op: &'static str) -> Self {
        Self::NotFound {
            message: message.into(),
            op,
        }
    }

    pub fn unauthorized(op: &'static str) -> Self {
        Self::Unauthorized { op }
    }

    pub fn forbidden(op: &'static str) -> Self {
        Self::Forbidden { op }
    }

    pub fn internal(source: impl Into<anyhow::Error>, op: &'static str) -> Self {
        Self::Internal {
            op,
            source: source.into(),
        }
    }

    /// Operation tag attached where the error was classified
    pub fn op(&self) -> &'static str {
        match self {
            Self::Validation { op, .. }
            | Self::Conflict { op, .. }
            | Self::NotFound { op, .. }
            | Self::Unauthorized { op }
            | Self::Forbidden { op }
            | Self::Internal { op, .. } => op,
        }
    }

    /// Wire classification
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "BAD_REQUEST",
            Self::Conflict { .. } => "CONFLICT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { message, .. }
            | Self::Conflict { message, .. }
            | Self::NotFound { message, .. } => message.clone(),
            Self::Unauthorized { .. } => "Not authorized".to_string(),
            Self::Forbidden { .. } => "Access denied".to_string(),
            Self::Internal { .. } => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal { op, source } = &self {
            tracing::error!(op = %op, error = ?source, "internal error");
        }

        let body = ErrorEnvelope {
            success: false,
            error: ApiError {
                kind: self.kind().to_string(),
                message: self.public_message(),
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "rejected request body");
        Self::validation("invalid request format", "ApiJson::from_request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::validation("x", "t"), StatusCode::BAD_REQUEST),
            (AppError::conflict("x", "t"), StatusCode::CONFLICT),
            (AppError::not_found("x", "t"), StatusCode::NOT_FOUND),
            (AppError::unauthorized("t"), StatusCode::UNAUTHORIZED),
            (AppError::forbidden("t"), StatusCode::FORBIDDEN),
            (
                AppError::internal(anyhow::anyhow!("boom"), "t"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.status(), status, "{error}");
            assert_eq!(error.op(), "t");
        }
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let error = AppError::internal(anyhow::anyhow!("connection refused on 10.0.0.5"), "op");
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["type"], "INTERNAL");
        assert_eq!(json["error"]["message"], "Internal server error");
        assert!(!json.to_string().contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_validation_envelope() {
        let response = AppError::validation("invalid credentials", "op").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "BAD_REQUEST");
        assert_eq!(json["error"]["message"], "invalid credentials");
    }

    #[test]
    fn test_display_includes_op() {
        let error = AppError::validation("wrong code", "AuthService::activate");
        assert_eq!(error.to_string(), "[AuthService::activate] wrong code");
    }
}
