//! Error types for the Loxone WebSocket client
//!
//! This module provides the crate-wide error enum, structured error codes for
//! machine-readable handling, and retry/authentication classification used by
//! supervisors that own the connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Loxone operations
pub type Result<T> = std::result::Result<T, LoxoneError>;

/// Error types for Loxone client operations
#[derive(Error, Debug)]
pub enum LoxoneError {
    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential errors
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parsing errors (binary frames, identifiers, envelopes)
    #[error("Parsing error: {0}")]
    Parsing(String),

    /// Internal state errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Connection errors (1000-1099)
    ConnectionTimeout,
    ConnectionRefused,
    ConnectionLost,

    // Authentication errors (1100-1199)
    InvalidCredentials,
    AuthenticationExpired,

    // Configuration errors (1200-1299)
    ConfigurationMissing,
    ConfigurationInvalid,

    // Data errors (1400-1499)
    ParsingFailed,
    InvalidInput,

    // Protocol errors (1700-1799)
    ProtocolViolation,
    MessageMalformed,

    // Security errors (1800-1899)
    CryptographicError,

    // Internal errors (1900-1999)
    InternalError,
    UnexpectedState,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::ConnectionTimeout => 1001,
            ErrorCode::ConnectionRefused => 1002,
            ErrorCode::ConnectionLost => 1003,

            ErrorCode::InvalidCredentials => 1101,
            ErrorCode::AuthenticationExpired => 1102,

            ErrorCode::ConfigurationMissing => 1201,
            ErrorCode::ConfigurationInvalid => 1202,

            ErrorCode::ParsingFailed => 1401,
            ErrorCode::InvalidInput => 1402,

            ErrorCode::ProtocolViolation => 1701,
            ErrorCode::MessageMalformed => 1703,

            ErrorCode::CryptographicError => 1801,

            ErrorCode::InternalError => 1901,
            ErrorCode::UnexpectedState => 1903,
        }
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self.as_number() {
            1000..=1099 => "connection",
            1100..=1199 => "authentication",
            1200..=1299 => "configuration",
            1400..=1499 => "data",
            1700..=1799 => "protocol",
            1800..=1899 => "security",
            1900..=1999 => "internal",
            _ => "unknown",
        }
    }
}

impl LoxoneError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an authentication error
    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a credentials error
    pub fn credentials<S: Into<String>>(msg: S) -> Self {
        Self::Credentials(msg.into())
    }

    /// Create a crypto error
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        Self::Crypto(msg.into())
    }

    /// Create a WebSocket transport error
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Self::WebSocket(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a parsing error
    pub fn parsing_error<S: Into<String>>(msg: S) -> Self {
        Self::Parsing(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Map this error to its structured error code
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            LoxoneError::Connection(_) => ErrorCode::ConnectionLost,
            LoxoneError::Authentication(_) => ErrorCode::InvalidCredentials,
            LoxoneError::Config(_) => ErrorCode::ConfigurationInvalid,
            LoxoneError::Credentials(_) => ErrorCode::ConfigurationMissing,
            LoxoneError::Crypto(_) => ErrorCode::CryptographicError,
            LoxoneError::WebSocket(_) => ErrorCode::ConnectionLost,
            LoxoneError::Timeout(_) => ErrorCode::ConnectionTimeout,
            LoxoneError::InvalidInput(_) => ErrorCode::InvalidInput,
            LoxoneError::Parsing(_) => ErrorCode::MessageMalformed,
            LoxoneError::Json(_) => ErrorCode::ParsingFailed,
            LoxoneError::Io(_) => ErrorCode::InternalError,
            LoxoneError::Generic(_) => ErrorCode::InternalError,
            LoxoneError::Internal(_) => ErrorCode::UnexpectedState,
        }
    }

    /// Check if error is retryable
    ///
    /// The client itself never retries; this is advice for the supervisor
    /// that decides whether to call `connect()` again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoxoneError::Connection(_) | LoxoneError::Timeout(_) | LoxoneError::WebSocket(_)
        )
    }

    /// Check if error indicates authentication issue
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LoxoneError::Authentication(_) | LoxoneError::Credentials(_)
        )
    }
}
