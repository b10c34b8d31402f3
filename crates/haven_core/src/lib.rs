//! Haven Core - Conversation Pipeline
//!
//! This crate provides the real-time conversation pipeline that
//! powers Haven's persona companions: session lifecycle, safety
//! screening in both directions, graph-backed context assembly, and
//! the stores that hold conversational state between connect and
//! extraction.

pub mod auth;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod graph;
pub mod id;
pub mod ledger;
pub mod local;
pub mod message;
pub mod model;
pub mod orchestrator;
pub mod persona;
pub mod retry;
pub mod safety;

pub use auth::{BudgetTracker, IdentityVerifier};
pub use config::PipelineConfig;
pub use connection::ConnectionRegistry;
pub use context::{ContextCache, ContextEntry, ContextSnapshot};
pub use error::{ConfigError, CoreError, Result};
pub use graph::{EntityExtractor, ExtractionResult, GraphContextStore, GraphEntity, GraphRelation};
pub use id::{ConnectionId, IdType, SessionId, UserId};
pub use ledger::ConversationLedger;
pub use message::{Envelope, EnvelopeKind, Message, MessageRole};
pub use model::{CompletionProvider, GenAiProvider};
pub use orchestrator::{ConnectAccept, ConversationOrchestrator};
pub use persona::{Persona, PersonaRegistry, Wall};
pub use safety::{Direction, KeywordScreen, SafetyScreen, SafetyVerdict, CRISIS_RESOURCE_REPLY};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        BudgetTracker, CompletionProvider, ConnectAccept, ConversationOrchestrator, CoreError,
        Direction, EntityExtractor, GraphContextStore, IdentityVerifier, PipelineConfig, Result,
        SafetyScreen, SafetyVerdict, SessionId, UserId, Wall,
    };
}
