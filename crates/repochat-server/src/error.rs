//! HTTP error bodies.

use axum::http::StatusCode;
use axum::response::Json;
use repochat_core::CoreError;
use serde::Serialize;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

/// What handlers return on failure.
pub type ApiFailure = (StatusCode, Json<ApiError>);

impl ApiError {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> ApiFailure {
        (StatusCode::NOT_FOUND, Json(Self::new(msg, "NOT_FOUND")))
    }

    pub fn bad_request(msg: impl Into<String>) -> ApiFailure {
        (StatusCode::BAD_REQUEST, Json(Self::new(msg, "BAD_REQUEST")))
    }

    pub fn conflict(msg: impl Into<String>) -> ApiFailure {
        (StatusCode::CONFLICT, Json(Self::new(msg, "CONFLICT")))
    }

    pub fn internal(msg: impl Into<String>) -> ApiFailure {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Self::new(msg, "INTERNAL_ERROR")),
        )
    }

    /// Map a core error to a status code.
    pub fn from_core(err: &CoreError) -> ApiFailure {
        match err {
            e if e.is_not_found() => Self::not_found(e.to_string()),
            CoreError::InvalidRequest(msg) => Self::bad_request(msg.clone()),
            CoreError::ConversationActive(_) => Self::conflict(err.to_string()),
            e => Self::internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repochat_core::HookError;
    use repochat_sandbox::SandboxError;

    #[test]
    fn test_core_error_mapping() {
        let cases = [
            (
                CoreError::from(HookError::NotRegistered("conv-1".into())),
                StatusCode::NOT_FOUND,
            ),
            (CoreError::RunNotFound("run_1".into()), StatusCode::NOT_FOUND),
            (
                CoreError::InvalidRequest("message is required".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CoreError::ConversationActive("conv-1".into()),
                StatusCode::CONFLICT,
            ),
            (
                CoreError::from(SandboxError::CreateFailed("quota".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from_core(&err).0, status, "{err}");
        }
    }
}
