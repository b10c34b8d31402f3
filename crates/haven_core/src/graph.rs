//! Per-user knowledge graph types and store seams
//!
//! The pipeline never owns graph storage; it talks to it through the
//! [`GraphContextStore`] and [`EntityExtractor`] traits so the backing
//! service can be swapped without touching conversation flow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::UserId;
use crate::message::Message;
use crate::persona::Wall;

/// Categories an extracted entity can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    People,
    Places,
    Topics,
    Events,
    Activities,
    Goals,
}

/// Relation classes between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Temporal,
    Causal,
    About,
    Supports,
    Conflicts,
}

/// One node in a user's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphEntity {
    pub name: String,
    pub kind: EntityKind,
    /// Short free-text summary of what is known about this entity.
    pub summary: String,
    pub last_mentioned: DateTime<Utc>,
}

/// One edge in a user's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphRelation {
    pub from: String,
    pub to: String,
    pub kind: RelationKind,
}

/// Extraction output for one session transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionResult {
    pub entities: Vec<GraphEntity>,
    pub relations: Vec<GraphRelation>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Read/write access to per-user graph context.
#[async_trait]
pub trait GraphContextStore: Send + Sync {
    /// The `top_k` most relevant entities for this user and persona,
    /// highest relevance first.
    async fn relevant_entities(
        &self,
        user_id: &UserId,
        wall: Wall,
        top_k: usize,
    ) -> Result<Vec<GraphEntity>>;

    /// Merge extraction output into the user's graph.
    async fn ingest(&self, user_id: &UserId, result: ExtractionResult) -> Result<()>;
}

/// Turns a finished session transcript into graph updates.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, user_id: &UserId, transcript: &[Message]) -> Result<ExtractionResult>;
}
