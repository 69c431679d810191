use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, AttemptError>;

#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("Unauthorized: session credentials are missing or expired")]
    Unauthorized,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Attempt has already been submitted")]
    AlreadySubmitted,

    #[error("A submission is already in flight")]
    SubmissionInFlight,

    #[error("Attempt is not in progress")]
    NotInProgress,

    #[error("Assignment was already submitted and cannot be retaken")]
    RetakeNotAllowed,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl AttemptError {
    /// Builds the error for a non-success HTTP status. 401 is mapped to
    /// `Unauthorized` so callers can hand it to the auth layer.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            return AttemptError::Unauthorized;
        }
        AttemptError::Rejected {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same operation. Authentication
    /// failures end the session and are never retried by the engine.
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Network(_)
            | AttemptError::Rejected { .. }
            | AttemptError::Storage(_)
            | AttemptError::Io(_)
            | AttemptError::Redis(_) => true,
            AttemptError::Unauthorized
            | AttemptError::AlreadySubmitted
            | AttemptError::SubmissionInFlight
            | AttemptError::NotInProgress
            | AttemptError::RetakeNotAllowed
            | AttemptError::Json(_)
            | AttemptError::Config(_) => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AttemptError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_401_maps_to_unauthorized() {
        let err = AttemptError::from_status(StatusCode::UNAUTHORIZED, "token expired");
        assert!(err.is_unauthorized());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_server_error_is_retryable() {
        let err = AttemptError::from_status(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Request rejected (502): upstream down");
    }
}
