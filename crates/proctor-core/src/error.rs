use thiserror::Error;

use crate::config::ConfigError;
use crate::session::SessionState;

/// Result type for proctoring operations
pub type ProctorResult<T> = Result<T, ProctorError>;

/// Caller-visible outcomes of a rejected proctoring operation.
///
/// None of these are process-fatal. A rejected operation leaves the
/// addressed session exactly as it was before the call.
#[derive(Error, Debug)]
pub enum ProctorError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session '{session_id}' is already active")]
    DuplicateSession { session_id: String },

    #[error("Session '{session_id}' is not accepting signals (state: {state:?})")]
    SessionInactive {
        session_id: String,
        state: SessionState,
    },

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ProctorError {
    pub fn not_found<S: Into<String>>(session_id: S) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    pub fn invalid_signal<S: Into<String>>(message: S) -> Self {
        Self::InvalidSignal(message.into())
    }

    /// Stable code for transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::DuplicateSession { .. } => "DUPLICATE_SESSION",
            Self::SessionInactive { .. } => "SESSION_INACTIVE",
            Self::InvalidSignal(_) => "INVALID_SIGNAL",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
