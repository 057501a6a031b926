//! Error types for corewire.

use thiserror::Error;

/// Main error type for all corewire operations.
#[derive(Debug, Error)]
pub enum CorewireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument (zero buffer size, missing builder field, etc.).
    ///
    /// Raised synchronously, before any socket state is touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Protocol framing error (malformed size/flags header).
    ///
    /// Fatal to the connection: the socket is aborted, never recovered.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection setup failure (connect/bind/listen).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation attempted in a state that forbids it
    /// (socket started twice, reactor already terminated).
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

/// Result type alias using CorewireError.
pub type Result<T> = std::result::Result<T, CorewireError>;
