use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use college_shared::{evaluate, AccessRequest, Decision, Identity};
use college_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("Upstream service error: {0}")]
    UpstreamFailure(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => EngineError::NotFound("record not found".to_string()),
            StoreError::Conflict => {
                EngineError::PreconditionFailed("record already exists".to_string())
            }
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            EngineError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            EngineError::PreconditionFailed(_) => (StatusCode::CONFLICT, self.to_string()),
            EngineError::ValidationFailed(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            EngineError::UpstreamFailure(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            EngineError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            EngineError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            EngineError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Give a bare [`EngineError::NotFound`] a resource-specific message.
pub trait NotFoundExt<T> {
    fn or_not_found(self, what: &str) -> Result<T, EngineError>;
}

impl<T> NotFoundExt<T> for Result<T, EngineError> {
    fn or_not_found(self, what: &str) -> Result<T, EngineError> {
        self.map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!("{what} not found")),
            other => other,
        })
    }
}

/// Run the evaluator and turn a denial into [`EngineError::Forbidden`].
pub fn authorize(actor: &Identity, request: &AccessRequest<'_>) -> Result<(), EngineError> {
    match evaluate(actor, request) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            tracing::debug!(user = %actor.id, role = %actor.role, %reason, "access denied");
            Err(EngineError::Forbidden(reason.to_string()))
        }
    }
}
