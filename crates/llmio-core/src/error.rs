use http::StatusCode;
use llmio_storage::StorageError;

/// Error kinds surfaced from the routing core, each with a stable HTTP
/// mapping and an OpenAI-shaped JSON body for the LLM surface.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    BadRequest(String),
    #[error("invalid or missing api key")]
    Unauthorized,
    #[error("model not allowed for this key")]
    Forbidden,
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("no eligible provider binding")]
    NoEligibleBinding,
    #[error("upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },
    #[error("retry deadline exceeded")]
    RetryTimeout,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::Unauthorized => StatusCode::UNAUTHORIZED,
            DispatchError::Forbidden => StatusCode::FORBIDDEN,
            DispatchError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::NoEligibleBinding | DispatchError::Upstream { .. } => {
                StatusCode::BAD_GATEWAY
            }
            DispatchError::RetryTimeout => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            DispatchError::BadRequest(_) => "invalid_request_error",
            DispatchError::Unauthorized | DispatchError::Forbidden => "authentication_error",
            DispatchError::ModelNotFound(_) => "not_found_error",
            DispatchError::NoEligibleBinding | DispatchError::Upstream { .. } => "upstream_error",
            DispatchError::RetryTimeout => "timeout_error",
            DispatchError::Storage(_) => "internal_error",
        }
    }

    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status().as_u16(),
            }
        })
    }
}
