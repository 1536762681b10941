//! Error types for the networking engine.
//!
//! These errors never reach operation listeners. Executors log them and
//! resolve the operation to its failure value instead; they surface directly
//! only from client construction and from [`Transport`](crate::transport::Transport)
//! implementations.

use thiserror::Error;

/// Network-specific errors.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    /// HTTP request failed.
    #[error("HTTP request error: {0}")]
    Request(String),
    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Connect or read timed out.
    #[error("Request timed out")]
    Timeout,
    /// Connection refused or failed.
    #[error("Connection error: {0}")]
    Connection(String),
    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),
    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
    /// The request was interrupted by cancellation.
    #[error("Request was cancelled")]
    Cancelled,
    /// Invalid response body.
    #[error("Invalid response body: {0}")]
    InvalidBody(String),
    /// Non-success HTTP status.
    #[error("HTTP {status}{}", reason_suffix(.message))]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// Diagnostic text from the response body.
        message: Option<String>,
    },
    /// Proxy configuration error.
    #[error("Proxy error: {0}")]
    Proxy(String),
    /// The worker thread or its runtime could not be started.
    #[error("Worker error: {0}")]
    Worker(String),
}

fn reason_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

impl NetworkError {
    /// Whether this error is a transient timeout worth retrying.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_body() || err.is_decode() {
            Self::InvalidBody(err.to_string())
        } else if err.is_builder() {
            Self::InvalidUrl(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Self::Timeout
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<http::header::InvalidHeaderName> for NetworkError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for NetworkError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<horizon_courier_core::CoreError> for NetworkError {
    fn from(err: horizon_courier_core::CoreError) -> Self {
        Self::Worker(err.to_string())
    }
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
