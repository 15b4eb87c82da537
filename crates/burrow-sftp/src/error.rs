//! Error types for SFTP operations
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: Every failure carries enough context for the server log,
//! while the message sent to the client never exposes the real root directory.

use crate::protocol::StatusCode;
use thiserror::Error;

/// Result type alias for SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// SFTP error types
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the underlying filesystem
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH transport error
    #[error("SSH error: {0}")]
    Ssh(String),

    /// Malformed or out-of-sequence SFTP packet
    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    /// Requested path does not exist
    ///
    /// Carries the client-visible message, e.g. `File does not exist /a.txt`.
    #[error("{0}")]
    NotFound(String),

    /// Handle was never issued or has already been closed
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Operation against a handle of the wrong kind
    /// (e.g. WRITE on a directory handle, READ on a write stream)
    #[error("{0}")]
    WrongHandleKind(String),

    /// Operation or open mode not supported
    #[error("{0}")]
    Unsupported(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for uncategorized failures
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error onto the SFTP status code sent to the client
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NoSuchFile,
            Error::Unsupported(_) => StatusCode::OpUnsupported,
            Error::Io(_)
            | Error::InvalidHandle(_)
            | Error::WrongHandleKind(_)
            | Error::Protocol(_)
            | Error::Ssh(_)
            | Error::Config(_)
            | Error::Other(_) => StatusCode::Failure,
        }
    }

    /// Get sanitized error message for client
    ///
    /// NIST 800-53: SI-11
    /// STIG: V-222566
    pub fn sanitized_message(&self) -> String {
        match self {
            Error::Config(_) => "Server configuration error".to_string(),
            Error::Ssh(_) => "Transport error".to_string(),
            // std::io::Error messages carry the OS description only, never the path
            Error::Io(e) => e.to_string(),
            _ => self.to_string(),
        }
    }

    /// `true` for errors caused by what the client sent
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidHandle(_)
                | Error::WrongHandleKind(_)
                | Error::Unsupported(_)
                | Error::Protocol(_)
        )
    }

    /// Create invalid handle error
    pub fn invalid_handle(context: impl Into<String>) -> Self {
        Error::InvalidHandle(context.into())
    }

    /// Create wrong-kind handle error
    pub fn wrong_kind(context: impl Into<String>) -> Self {
        Error::WrongHandleKind(context.into())
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::Ssh(err.to_string())
    }
}
