//! Conversation turns and the wire envelope
//!
//! A [`Message`] is one immutable turn in a session, written once by
//! the orchestrator and never mutated. The [`Envelope`] is the JSON
//! shape that crosses the transport in either direction.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::id::SessionId;
use crate::safety::SafetyVerdict;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// One turn in a conversation. Immutable once written; sequence is
/// strictly increasing per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub session_id: SessionId,
    pub sequence: u64,
    pub role: MessageRole,
    pub text: String,
    pub verdict: SafetyVerdict,
    pub created_at: DateTime<Utc>,
    pub ttl_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        session_id: SessionId,
        sequence: u64,
        role: MessageRole,
        text: impl Into<String>,
        verdict: SafetyVerdict,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            sequence,
            role,
            text: text.into(),
            verdict,
            created_at: now,
            ttl_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl_at
    }
}

/// Envelope kinds crossing the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    UserMessage,
    AssistantMessage,
    SystemNotice,
}

/// Wire envelope for the bidirectional transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub session_id: SessionId,
    pub sequence: u64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn assistant(session_id: SessionId, sequence: u64, text: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::AssistantMessage,
            session_id,
            sequence,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// System notices carry no conversational sequence of their own.
    pub fn notice(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::SystemNotice,
            session_id,
            sequence: 0,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
