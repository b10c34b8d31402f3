//! In-process collaborator implementations
//!
//! These back the trait seams without any external service: good for
//! local development, demos, and the server's default wiring. Each one
//! keeps the trait contract exactly, so swapping in a networked
//! implementation is a wiring change only.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::auth::{BudgetTracker, IdentityVerifier};
use crate::error::{CoreError, Result};
use crate::graph::{EntityKind, ExtractionResult, GraphContextStore, GraphEntity};
use crate::id::UserId;
use crate::message::{Message, MessageRole};
use crate::persona::Wall;

/// Token table verifier. Tokens are opaque strings mapped to user ids
/// at construction time.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: impl IntoIterator<Item = (String, UserId)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Dev-mode verifier that accepts any token of the form
    /// `dev-<user>` as user `<user>`.
    pub fn dev_mode() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId> {
        if let Some(user_id) = self.tokens.get(token) {
            return Ok(user_id.clone());
        }
        if let Some(user) = token.strip_prefix("dev-") {
            if !user.is_empty() {
                return Ok(UserId::from(user));
            }
        }
        Err(CoreError::AuthRejected {
            reason: "unrecognized token".to_string(),
        })
    }
}

/// Budget tracker keeping consumed minutes per (user, day) in memory.
pub struct LocalBudgetTracker {
    daily_budget: u32,
    consumed: DashMap<(UserId, NaiveDate), u32>,
}

impl LocalBudgetTracker {
    pub fn new(daily_budget: u32) -> Self {
        Self {
            daily_budget,
            consumed: DashMap::new(),
        }
    }
}

#[async_trait]
impl BudgetTracker for LocalBudgetTracker {
    async fn remaining_minutes(&self, user_id: &UserId, day: NaiveDate) -> Result<u32> {
        let used = self
            .consumed
            .get(&(user_id.clone(), day))
            .map(|v| *v)
            .unwrap_or(0);
        Ok(self.daily_budget.saturating_sub(used))
    }

    async fn consume(&self, user_id: &UserId, day: NaiveDate, minutes: u32) -> Result<()> {
        *self
            .consumed
            .entry((user_id.clone(), day))
            .or_insert(0) += minutes;
        Ok(())
    }
}

/// Per-user graph kept in memory, merged by entity name.
#[derive(Debug, Default)]
pub struct LocalGraphStore {
    graphs: DashMap<UserId, ExtractionResult>,
}

impl LocalGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphContextStore for LocalGraphStore {
    async fn relevant_entities(
        &self,
        user_id: &UserId,
        _wall: Wall,
        top_k: usize,
    ) -> Result<Vec<GraphEntity>> {
        let mut entities = self
            .graphs
            .get(user_id)
            .map(|g| g.entities.clone())
            .unwrap_or_default();
        // Most recently mentioned first stands in for relevance until
        // a real ranking backend is wired.
        entities.sort_by(|a, b| b.last_mentioned.cmp(&a.last_mentioned));
        entities.truncate(top_k);
        Ok(entities)
    }

    async fn ingest(&self, user_id: &UserId, result: ExtractionResult) -> Result<()> {
        if result.is_empty() {
            return Ok(());
        }
        let mut graph = self.graphs.entry(user_id.clone()).or_default();
        for entity in result.entities {
            match graph.entities.iter_mut().find(|e| e.name == entity.name) {
                Some(existing) => {
                    existing.summary = entity.summary;
                    existing.last_mentioned = entity.last_mentioned;
                }
                None => graph.entities.push(entity),
            }
        }
        for relation in result.relations {
            if !graph.relations.contains(&relation) {
                graph.relations.push(relation);
            }
        }
        info!(user_id = %user_id, entities = graph.entities.len(), "graph updated");
        Ok(())
    }
}

/// Keyword-driven extractor. Looks for first-person markers in user
/// turns and records what follows them as entities. Deliberately
/// shallow; a model-backed extractor replaces this in production.
#[derive(Debug, Default)]
pub struct HeuristicExtractor;

const MARKERS: &[(&str, EntityKind)] = &[
    ("my friend ", EntityKind::People),
    ("my teacher ", EntityKind::People),
    ("i went to ", EntityKind::Places),
    ("we went to ", EntityKind::Places),
    ("i want to ", EntityKind::Goals),
    ("i played ", EntityKind::Activities),
    ("i practiced ", EntityKind::Activities),
    ("talked about ", EntityKind::Topics),
];

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl crate::graph::EntityExtractor for HeuristicExtractor {
    async fn extract(
        &self,
        _user_id: &UserId,
        transcript: &[Message],
    ) -> Result<ExtractionResult> {
        let now = Utc::now();
        let mut result = ExtractionResult::default();

        for message in transcript {
            if message.role != MessageRole::User {
                continue;
            }
            let lower = message.text.to_lowercase();
            for (marker, kind) in MARKERS {
                let Some(start) = lower.find(marker) else {
                    continue;
                };
                // Indexing the original text by an offset found in the
                // lowercased copy is only safe while lengths agree.
                let Some(rest) = message.text.get(start + marker.len()..) else {
                    continue;
                };
                let name: String = rest
                    .split([',', '.', '!', '?'])
                    .next()
                    .unwrap_or("")
                    .split_whitespace()
                    .take(3)
                    .collect::<Vec<_>>()
                    .join(" ");
                if name.is_empty() {
                    continue;
                }
                if result.entities.iter().any(|e| e.name == name) {
                    continue;
                }
                result.entities.push(GraphEntity {
                    name,
                    kind: *kind,
                    summary: message.text.clone(),
                    last_mentioned: now,
                });
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityExtractor;
    use crate::id::SessionId;
    use crate::safety::SafetyVerdict;
    use chrono::Duration;

    fn user_msg(text: &str) -> Message {
        Message::new(
            SessionId::generate(),
            1,
            MessageRole::User,
            text.to_string(),
            SafetyVerdict::Clear,
            Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn dev_tokens_resolve_and_garbage_is_rejected() {
        let verifier = StaticTokenVerifier::dev_mode();
        let user = verifier.verify("dev-sam").await.unwrap();
        assert_eq!(user.as_str(), "sam");
        assert!(verifier.verify("nope").await.is_err());
        assert!(verifier.verify("dev-").await.is_err());
    }

    #[tokio::test]
    async fn budget_decrements_and_saturates() {
        let tracker = LocalBudgetTracker::new(30);
        let user = UserId::from("u1");
        let day = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();

        assert_eq!(tracker.remaining_minutes(&user, day).await.unwrap(), 30);
        tracker.consume(&user, day, 25).await.unwrap();
        assert_eq!(tracker.remaining_minutes(&user, day).await.unwrap(), 5);
        tracker.consume(&user, day, 10).await.unwrap();
        assert_eq!(tracker.remaining_minutes(&user, day).await.unwrap(), 0);

        // Next day starts fresh.
        let next = day.succ_opt().unwrap();
        assert_eq!(tracker.remaining_minutes(&user, next).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn ingest_merges_by_name() {
        let store = LocalGraphStore::new();
        let user = UserId::from("u1");
        let entity = |summary: &str| GraphEntity {
            name: "soccer".to_string(),
            kind: EntityKind::Activities,
            summary: summary.to_string(),
            last_mentioned: Utc::now(),
        };

        store
            .ingest(
                &user,
                ExtractionResult {
                    entities: vec![entity("plays on weekends")],
                    relations: vec![],
                },
            )
            .await
            .unwrap();
        store
            .ingest(
                &user,
                ExtractionResult {
                    entities: vec![entity("made the school team")],
                    relations: vec![],
                },
            )
            .await
            .unwrap();

        let entities = store
            .relevant_entities(&user, Wall::North, 20)
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].summary, "made the school team");
    }

    #[tokio::test]
    async fn extractor_picks_up_marked_entities() {
        let extractor = HeuristicExtractor::new();
        let user = UserId::from("u1");
        let transcript = vec![
            user_msg("My friend Maya came over and we went to the park."),
            user_msg("I want to make the soccer team this year!"),
        ];

        let result = extractor.extract(&user, &transcript).await.unwrap();
        let names: Vec<_> = result.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Maya came over"));
        assert!(names.contains(&"the park"));
        assert!(names.contains(&"make the soccer"));
    }

    #[tokio::test]
    async fn extractor_ignores_assistant_turns() {
        let extractor = HeuristicExtractor::new();
        let user = UserId::from("u1");
        let mut msg = user_msg("I went to the beach.");
        msg.role = MessageRole::Assistant;

        let result = extractor.extract(&user, &[msg]).await.unwrap();
        assert!(result.is_empty());
    }
}
