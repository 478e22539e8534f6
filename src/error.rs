//! Unified application error types and conversion helpers.
//! Protocol and transport failures are classified here so the dispatch
//! boundaries can log them uniformly and never let them escape a task.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level classification used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed JSON / invalid frame
    Parse,
    /// Frame was well-formed but violated the message protocol
    Protocol,
    /// The transport has no open connection
    NotConnected,
    /// The transport failed while connecting, reading or writing
    Transport,
    /// Internal I/O failure (disk, flag store)
    Io,
    /// Unexpected internal error / bug
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Protocol => "protocol",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Transport => "transport",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        })
    }
}

/// Core error enum used throughout the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("socket is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Parse(_) => ErrorKind::Parse,
            AppError::Protocol(_) => ErrorKind::Protocol,
            AppError::NotConnected => ErrorKind::NotConnected,
            AppError::Transport(_) => ErrorKind::Transport,
            AppError::Io(_) => ErrorKind::Io,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Short machine error code string (snake_case) used in structured logs.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Parse => "parse_error",
            ErrorKind::Protocol => "protocol_error",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Io => "io_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

/// Shorthand constructors for common errors.
pub mod err {
    use super::AppError;
    pub fn parse(msg: impl Into<String>) -> AppError {
        AppError::Parse(msg.into())
    }
    pub fn protocol(msg: impl Into<String>) -> AppError {
        AppError::Protocol(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> AppError {
        AppError::Internal(msg.into())
    }
}

/// Macro for early-returning an AppError in functions returning Result<T, AppError>
#[macro_export]
macro_rules! bail_app {
    ($variant:ident, $($arg:tt)*) => { return Err($crate::error::AppError::$variant(format!($($arg)*))) };
}
