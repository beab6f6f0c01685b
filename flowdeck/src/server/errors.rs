//! HTTP error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::errors::EngineError;

/// Error type returned by handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A request body or parameter that could not be used
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(err: &EngineError) -> StatusCode {
    match err.root_cause() {
        EngineError::DeploymentInProgress { .. } | EngineError::AlreadyTerminal { .. } => {
            StatusCode::CONFLICT
        }
        EngineError::ScriptSyntaxError { .. }
        | EngineError::ValidationError(_)
        | EngineError::RollbackTargetInvalid { .. }
        | EngineError::HookCycle(_)
        | EngineError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::ExternalCommandFailure { .. } | EngineError::SpawnFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        EngineError::TimeoutExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Engine(err) => {
                let status = status_for(err);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "Internal error");
                }
                let mut body = json!({
                    "error": err.to_string(),
                    "code": err.code(),
                });
                if let EngineError::DeploymentFailed { deployment_id, .. } = err {
                    body["deployment_id"] = json!(deployment_id);
                }
                (status, body)
            }
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "code": "bad_request" }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}
