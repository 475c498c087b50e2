//! Shared error type across gubernator crates.

use thiserror::Error;

/// Wire-level status codes carried in response frames (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Request completed; body is the response payload.
    Ok,
    /// The caller's deadline fired before evaluation finished.
    Deadline,
    /// Everything else: invariant violations, cache pressure, bad frames.
    Internal,
}

impl ErrorCode {
    /// Status byte used by the frame protocol.
    pub fn as_u8(self) -> u8 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::Deadline => 1,
            ErrorCode::Internal => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ErrorCode::Ok),
            1 => Some(ErrorCode::Deadline),
            2 => Some(ErrorCode::Internal),
            _ => None,
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, GubernatorError>;

/// Unified error type used by core and server.
#[derive(Debug, Error)]
pub enum GubernatorError {
    /// Request-level validation failure. The `Display` text is surfaced
    /// verbatim in the response `error` field.
    #[error("{0}")]
    Validation(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("peer request queue is full")]
    QueueFull,
    #[error("deadline exceeded")]
    Deadline,
    #[error("cache is full and holds no expired entries")]
    CacheFull,
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl GubernatorError {
    /// Map to the stable wire-level status code for top-level RPC failures.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            GubernatorError::Deadline => ErrorCode::Deadline,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this error rides the per-item `error` field instead of
    /// failing the whole call.
    pub fn is_in_band(&self) -> bool {
        matches!(
            self,
            GubernatorError::Validation(_)
                | GubernatorError::Transport(_)
                | GubernatorError::QueueFull
        )
    }
}
