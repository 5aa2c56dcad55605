use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

/// The four error kinds the core distinguishes, per the error-handling design.
///
/// `Validation` and `Dependency` are raised at construction time (config load,
/// block/feed construction) and never expected once a feed is live.
/// `RemoteRetryable`/`RemoteNonRetryable` classify a failed call to the remote
/// editor and decide whether the retry policy applies backoff.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Validation(#[source] anyhow::Error),

    #[error("dependency unavailable: {0}")]
    Dependency(#[source] anyhow::Error),

    #[error("remote editor call failed after retries: {0}")]
    RemoteRetryable(#[source] anyhow::Error),

    #[error("remote editor rejected the request: {0}")]
    RemoteNonRetryable(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn validation(err: impl Into<anyhow::Error>) -> Self {
        Self::Validation(err.into())
    }

    pub fn dependency(err: impl Into<anyhow::Error>) -> Self {
        Self::Dependency(err.into())
    }

    /// True for the non-retryable remote variant; the sentinel callers use to
    /// tell "gave up after retries" from "the server told us not to bother".
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Self::RemoteNonRetryable(_))
    }
}

/// Operator-facing command failures, returned from `Feed::process_command`.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("block '{0}' not found")]
    UnknownBlock(String),
    #[error("block '{0}' does not support commands")]
    NotSupported(String),
    #[error("command failed: {0}")]
    Failed(#[source] anyhow::Error),
}

/// Error boundary for the admin HTTP API: an `IntoResponse`-wrapped error
/// with a structured body, so operators get `{error, details}` back instead
/// of a bare 500.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl ApiError {
    pub fn from_command_error(err: CommandError) -> Self {
        match err {
            CommandError::UnknownBlock(_) => ApiError::not_found(err.to_string()),
            CommandError::NotSupported(_) => ApiError::bad_request(err.to_string()),
            CommandError::Failed(source) => ApiError::bad_request("command failed").with_details(source.to_string()),
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        tracing::error!(error = ?err, "admin api request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}
