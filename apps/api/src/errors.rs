use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::llm_client::{ErrorKind, LlmError};
use crate::transcript::CodecError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No personas selected")]
    NoPersonasSelected,

    #[error("All personas failed to produce a verdict")]
    AllPersonasFailed,

    #[error("External call for '{target}' failed ({kind}): {message}")]
    ExternalCallFailed {
        kind: ErrorKind,
        target: String,
        message: String,
    },

    #[error("Transcript could not be parsed: {0}")]
    TranscriptUnparseable(String),

    #[error("A run for this candidate, job and persona set already exists: {existing_id}")]
    AlreadyExists { existing_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Wraps a call failure that survived the retry policy, naming the persona/turn.
    pub fn external(target: impl Into<String>, err: &LlmError) -> Self {
        AppError::ExternalCallFailed {
            kind: err.kind(),
            target: target.into(),
            message: err.to_string(),
        }
    }
}

impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Empty => AppError::TranscriptUnparseable(err.to_string()),
            CodecError::Encode(msg) => AppError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NoPersonasSelected => (
                StatusCode::BAD_REQUEST,
                "NO_PERSONAS_SELECTED",
                self.to_string(),
            ),
            AppError::AllPersonasFailed => {
                tracing::error!("Evaluation failed: no persona produced a verdict");
                (
                    StatusCode::BAD_GATEWAY,
                    "ALL_PERSONAS_FAILED",
                    self.to_string(),
                )
            }
            AppError::ExternalCallFailed { kind, target, .. } => {
                tracing::error!("{self}");
                let status = match kind {
                    ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (
                    status,
                    "EXTERNAL_CALL_FAILED",
                    format!("The AI call for '{target}' failed ({kind})"),
                )
            }
            AppError::TranscriptUnparseable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "TRANSCRIPT_UNPARSEABLE",
                msg.clone(),
            ),
            AppError::AlreadyExists { .. } => {
                (StatusCode::CONFLICT, "ALREADY_EXISTS", self.to_string())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::NoPersonasSelected, StatusCode::BAD_REQUEST),
            (AppError::AllPersonasFailed, StatusCode::BAD_GATEWAY),
            (
                AppError::AlreadyExists {
                    existing_id: Uuid::new_v4(),
                },
                StatusCode::CONFLICT,
            ),
            (
                AppError::from(CodecError::Empty),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_external_failure_keeps_kind_and_target() {
        let err = AppError::external(
            "manager",
            &LlmError::Api {
                status: 429,
                message: "slow down".into(),
            },
        );
        match &err {
            AppError::ExternalCallFailed { kind, target, .. } => {
                assert_eq!(*kind, ErrorKind::RateLimited);
                assert_eq!(target, "manager");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
