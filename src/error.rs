//! Error types for Snapgram
//!
//! Every failure the data layer can produce is an `AppError`.
//! Callers that only care whether an operation worked can branch on
//! `Result::is_ok`; callers that want to tell the user more can look
//! at [`AppError::kind`].

use thiserror::Error;

/// Coarse classification of where a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The backend understood the request and rejected it
    Remote,
    /// The request never got a usable answer
    Transport,
    /// A local precondition did not hold (no session, bad input)
    Precondition,
    /// Misconfiguration or a bug in this crate
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Transport => "transport",
            Self::Precondition => "precondition",
            Self::Internal => "internal",
        }
    }
}

/// Application-wide error type
///
/// Cloneable so that a single failed fetch can be handed to every
/// observer waiting on the same query.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Document, file or account not found
    #[error("Resource not found")]
    NotFound,

    /// Credentials rejected or session missing on the backend side
    #[error("Authentication required")]
    Unauthorized,

    /// No active session for an operation that needs one
    #[error("No active session")]
    NoSession,

    /// Input rejected before or by the backend
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource already exists (duplicate email, duplicate id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend rejected the request for another reason
    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// Blob storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network or transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Classify this error by origin
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound
            | AppError::Unauthorized
            | AppError::Conflict(_)
            | AppError::Backend { .. }
            | AppError::Storage(_) => ErrorKind::Remote,
            AppError::Validation(_) | AppError::NoSession => ErrorKind::Precondition,
            AppError::Transport(_) | AppError::Decode(_) => ErrorKind::Transport,
            AppError::Config(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Map an HTTP status and backend message to an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => AppError::Validation(message),
            401 | 403 => AppError::Unauthorized,
            404 => AppError::NotFound,
            409 => AppError::Conflict(message),
            _ => AppError::Backend { status, message },
        }
    }

    /// Record this error in the error counter
    pub(crate) fn record(&self, operation: &str) {
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[self.kind().as_str(), operation])
            .inc();
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AppError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => AppError::from_status(status.as_u16(), err.to_string()),
            None => AppError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
