//! Client error types with transient/permanent classification.

use thiserror::Error;

/// Error that can occur while talking to the list service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to establish a connection to the service.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Request timed out.
    #[error("request timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The service rejected the request (HTTP 4xx/5xx).
    ///
    /// `detail` carries the service's own error text verbatim so it can be
    /// preserved in sync history for operator diagnosis.
    #[error("API error (HTTP {status}): {detail}")]
    Api { status: u16, detail: String },

    /// The API key was rejected.
    #[error("authentication failed: API key rejected")]
    AuthenticationFailed,

    /// Too many requests; the service asked us to back off.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// Client configuration is unusable (missing key, bad server prefix).
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The service returned a body we could not interpret.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },
}

impl ClientError {
    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ClientError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with its underlying cause.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ClientError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an API error from an HTTP status and the service's detail text.
    pub fn api(status: u16, detail: impl Into<String>) -> Self {
        ClientError::Api {
            status,
            detail: detail.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ClientError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a malformed response error.
    pub fn malformed_response(message: impl Into<String>) -> Self {
        ClientError::MalformedResponse {
            message: message.into(),
        }
    }

    /// Check if this error is transient.
    ///
    /// Transient errors may succeed on a later scheduled run. The engine
    /// never retries within a pass either way; this classification exists
    /// for history reporting and operator dashboards.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::ConnectionFailed { .. }
            | ClientError::Timeout { .. }
            | ClientError::RateLimited { .. } => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error is permanent and a retry will not help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get a stable code for classification in history records.
    pub fn error_code(&self) -> &'static str {
        match self {
            ClientError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ClientError::Timeout { .. } => "TIMEOUT",
            ClientError::Api { .. } => "API_ERROR",
            ClientError::AuthenticationFailed => "AUTH_FAILED",
            ClientError::RateLimited { .. } => "RATE_LIMITED",
            ClientError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ClientError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
