//! Engine errors as HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use casework_core::{EngineError, StoreError};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("missing or invalid identity: {0}")]
    Unauthenticated(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Engine(err) => engine_status(err),
        }
    }

    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Engine(err) => match err {
                EngineError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
                EngineError::BlockingElementsPresent { .. } => "BLOCKING_ELEMENTS_PRESENT",
                EngineError::WorkspaceLocked { .. } => "WORKSPACE_LOCKED",
                EngineError::Immutable { .. } => "WORKSPACE_IMMUTABLE",
                EngineError::ExtractionFailed(_) => "EXTRACTION_FAILED",
                EngineError::ChainIntegrityViolation(_) => "CHAIN_INTEGRITY_VIOLATION",
                EngineError::NotFound { .. } => "NOT_FOUND",
                EngineError::Forbidden(_) => "FORBIDDEN",
                EngineError::InvalidInput(_) => "INVALID_INPUT",
                EngineError::Store(_) => "STORE_ERROR",
                EngineError::Audit(_) => "AUDIT_ERROR",
            },
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let Self::Engine(err) = self {
            body["retryable"] = json!(err.is_retryable());
            match err {
                EngineError::InvalidStateTransition { violations, .. } => {
                    body["violations"] = json!(violations);
                }
                EngineError::BlockingElementsPresent { ids, .. } => {
                    body["blockingIds"] = json!(ids);
                }
                EngineError::ExtractionFailed(cause) => {
                    body["cause"] = json!(cause.code());
                }
                _ => {}
            }
        }
        body
    }
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidStateTransition { .. } | EngineError::Immutable { .. } => StatusCode::CONFLICT,
        EngineError::BlockingElementsPresent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::WorkspaceLocked { .. } => StatusCode::LOCKED,
        EngineError::ExtractionFailed(_) => StatusCode::BAD_GATEWAY,
        EngineError::NotFound { .. } | EngineError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        EngineError::Forbidden(_) | EngineError::Store(StoreError::TenantMismatch(_)) => StatusCode::FORBIDDEN,
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::Store(StoreError::VersionConflict { .. }) => StatusCode::CONFLICT,
        EngineError::ChainIntegrityViolation(_) | EngineError::Store(_) | EngineError::Audit(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casework_core::{ExtractionError, MissingElementId, Operation, WorkspaceId, WorkspaceState};

    #[test]
    fn engine_errors_map_to_statuses() {
        let id = WorkspaceId::new();
        let cases = [
            (
                EngineError::BlockingElementsPresent {
                    from: WorkspaceState::FactsExtracted,
                    to: WorkspaceState::ReadyForHuman,
                    ids: vec![MissingElementId::new()],
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::WorkspaceLocked { id, operation: Operation::Extract },
                StatusCode::LOCKED,
            ),
            (
                EngineError::ExtractionFailed(ExtractionError::Timeout { after_ms: 10 }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                EngineError::NotFound { entity: "workspace", id: id.to_string() },
                StatusCode::NOT_FOUND,
            ),
            (EngineError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (EngineError::InvalidInput("empty".into()), StatusCode::BAD_REQUEST),
            (
                EngineError::Immutable { id, reason: "workspace is archived" },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn blocking_body_lists_element_ids() {
        let blocker = MissingElementId::new();
        let err = ApiError::from(EngineError::BlockingElementsPresent {
            from: WorkspaceState::FactsExtracted,
            to: WorkspaceState::ReadyForHuman,
            ids: vec![blocker],
        });
        let body = err.body();
        assert_eq!(body["error"], "BLOCKING_ELEMENTS_PRESENT");
        assert_eq!(body["blockingIds"][0], json!(blocker));
        assert_eq!(body["retryable"], false);
    }
}
