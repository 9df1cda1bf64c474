use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the relay proxy server
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Upstream request errors (transport failures, bad responses)
    #[error("Upstream error: {message}")]
    Upstream { message: String },

    /// No backend passed the health and capacity checks
    #[error("no healthy backend available")]
    NoHealthyBackend,

    /// Health check errors
    #[error("Health check error: {message}")]
    HealthCheck { message: String },

    /// Cache errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// Malformed request construction
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },
}

impl RelayError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Create a health check error
    pub fn health_check<S: Into<String>>(message: S) -> Self {
        Self::HealthCheck {
            message: message.into(),
        }
    }

    /// Create a cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

impl From<hyper::Error> for RelayError {
    fn from(err: hyper::Error) -> Self {
        Self::Upstream {
            message: err.to_string(),
        }
    }
}

impl From<hyper::http::Error> for RelayError {
    fn from(err: hyper::http::Error) -> Self {
        Self::InvalidRequest {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
