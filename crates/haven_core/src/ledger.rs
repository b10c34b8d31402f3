//! Per-session conversation ledger
//!
//! Append-only record of screened turns, keyed by session. Entries
//! carry their own expiry and are dropped lazily on read; the ledger
//! never spawns a background sweeper.

use chrono::Utc;
use dashmap::DashMap;

use crate::error::{CoreError, Result};
use crate::id::SessionId;
use crate::message::Message;

/// In-memory conversation ledger with strict per-session sequence
/// validation. Sequences are allocated by the caller; the ledger
/// independently rejects gaps and duplicates.
#[derive(Debug, Default)]
pub struct ConversationLedger {
    sessions: DashMap<SessionId, Vec<Message>>,
}

impl ConversationLedger {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Append a message. The message's sequence must be exactly one
    /// greater than the last live entry for its session (or 1 for an
    /// empty session).
    pub fn append(&self, message: Message) -> Result<()> {
        let mut entry = self.sessions.entry(message.session_id.clone()).or_default();
        let now = Utc::now();
        entry.retain(|m| !m.is_expired(now));

        let expected = entry.last().map(|m| m.sequence + 1).unwrap_or(1);
        if message.sequence != expected {
            return Err(CoreError::SequenceConflict {
                session_id: message.session_id.clone(),
                expected,
                got: message.sequence,
            });
        }
        entry.push(message);
        Ok(())
    }

    /// Live messages with sequence strictly greater than `after`, in
    /// sequence order. Unknown sessions yield an empty list.
    pub fn list_since(&self, session_id: &SessionId, after: u64) -> Vec<Message> {
        let now = Utc::now();
        match self.sessions.get(session_id) {
            Some(entry) => entry
                .iter()
                .filter(|m| !m.is_expired(now) && m.sequence > after)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// The last `window` live messages, oldest first. Used to build
    /// the recent-history block of a prompt.
    pub fn recent(&self, session_id: &SessionId, window: usize) -> Vec<Message> {
        let mut all = self.list_since(session_id, 0);
        if all.len() > window {
            all.drain(..all.len() - window);
        }
        all
    }

    /// Sequence of the last live entry, or 0 for an empty/unknown
    /// session.
    pub fn last_sequence(&self, session_id: &SessionId) -> u64 {
        self.list_since(session_id, 0)
            .last()
            .map(|m| m.sequence)
            .unwrap_or(0)
    }

    /// Remove and return a session's live transcript. Called once at
    /// session end to hand the transcript to extraction.
    pub fn take_session(&self, session_id: &SessionId) -> Vec<Message> {
        let now = Utc::now();
        match self.sessions.remove(session_id) {
            Some((_, messages)) => messages
                .into_iter()
                .filter(|m| !m.is_expired(now))
                .collect(),
            None => Vec::new(),
        }
    }
}
