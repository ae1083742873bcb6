use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by the registry, the dispatchers and the log store.
#[derive(Debug, thiserror::Error)]
pub enum WolError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{action} command failed (rc={returncode})")]
    CommandFailed {
        action: String,
        returncode: i32,
        stdout: String,
        stderr: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WolResult<T> = Result<T, WolError>;

impl WolError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unknown_target() -> Self {
        Self::NotFound("unknown target".into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable(_)
            | Self::CommandFailed { .. }
            | Self::Io(_)
            | Self::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            Self::CommandFailed { action, returncode, stdout, stderr } => json!({
                "error": format!("{action} command failed"),
                "returncode": returncode,
                "stdout": stdout,
                "stderr": stderr,
            }),
            Self::Io(_) | Self::Json(_) => {
                tracing::error!(error = %self, "internal error");
                json!("internal error")
            }
            other => json!(other.to_string()),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
