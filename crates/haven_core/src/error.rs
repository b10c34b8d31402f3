use crate::id::{SessionId, UserId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration-specific errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Authentication rejected")]
    #[diagnostic(
        code(haven_core::auth_rejected),
        help("The bearer token was invalid or expired; the client must reauthenticate and reconnect")
    )]
    AuthRejected { reason: String },

    #[error("Daily conversation budget exhausted for user {user_id}")]
    #[diagnostic(
        code(haven_core::budget_exhausted),
        help("The user has used their full daily allotment; connections are refused until tomorrow")
    )]
    BudgetExhausted { user_id: UserId },

    #[error("Session {session_id} has expired")]
    #[diagnostic(
        code(haven_core::session_expired),
        help("The session passed its budget window or the connection TTL lapsed; the client must reconnect")
    )]
    SessionExpired { session_id: SessionId },

    #[error("Unknown session {session_id}")]
    #[diagnostic(
        code(haven_core::session_not_found),
        help("No live session with this id; it may have been superseded or already destroyed")
    )]
    SessionNotFound { session_id: SessionId },

    #[error("Sequence conflict in session {session_id}: expected {expected}, got {got}")]
    #[diagnostic(
        code(haven_core::sequence_conflict),
        help("The ledger rejected an out-of-order or duplicate sequence; this indicates a caller bug, not a runtime condition")
    )]
    SequenceConflict {
        session_id: SessionId,
        expected: u64,
        got: u64,
    },

    #[error("Safety classifier unavailable")]
    #[diagnostic(
        code(haven_core::safety_screen_unavailable),
        help("Classification failed after retries; the turn is treated as unsafe (fail closed)")
    )]
    SafetyScreenUnavailable { cause: String },

    #[error("Language model unavailable")]
    #[diagnostic(
        code(haven_core::llm_unavailable),
        help("The completion call failed after retry; surfaced to the client as a recoverable error")
    )]
    LlmUnavailable { cause: String },

    #[error("No active connection for session {session_id}")]
    #[diagnostic(
        code(haven_core::no_active_connection),
        help("Best-effort delivery failed because the client is gone; the pending payload is dropped")
    )]
    NoActiveConnection { session_id: SessionId },

    #[error("Unknown persona identifier '{value}'")]
    #[diagnostic(
        code(haven_core::unknown_persona),
        help("Valid persona identifiers are the four wall positions: north, south, east, west")
    )]
    UnknownPersona { value: String },

    #[error("Graph context store operation failed")]
    #[diagnostic(
        code(haven_core::graph_store),
        help("Check connectivity to the graph collaborator; ledger data is retained for 24h so extraction can be retried")
    )]
    GraphStore { cause: String },

    #[error("Conversation extraction failed")]
    #[diagnostic(code(haven_core::extraction))]
    Extraction { cause: String },

    #[error("Configuration error")]
    #[diagnostic(code(haven_core::config))]
    Configuration(#[from] ConfigError),
}

impl CoreError {
    /// Whether this error should end the session, as opposed to being
    /// handled within the turn.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::AuthRejected { .. }
                | CoreError::BudgetExhausted { .. }
                | CoreError::SessionExpired { .. }
                | CoreError::SessionNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
