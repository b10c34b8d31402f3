//! Graph-context snapshot cache
//!
//! Context fetches hit the graph store at most once per (user, wall)
//! per TTL window; everything in between serves the cached snapshot.
//! A fetch failure degrades to whatever snapshot exists (stale
//! included) rather than blocking the turn.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::graph::{GraphContextStore, GraphEntity};
use crate::id::UserId;
use crate::persona::Wall;

/// One ranked entry rendered into the persona prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub entity_ref: String,
    pub relevance_score: f64,
    pub summary_text: String,
}

/// A cached set of context entries for one (user, wall) pair.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub entries: Vec<ContextEntry>,
    pub fetched_at: DateTime<Utc>,
    ttl_at: DateTime<Utc>,
}

impl ContextSnapshot {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl_at
    }

    /// Render entries as the bullet block substituted into the
    /// persona template. An empty snapshot renders a placeholder so
    /// the prompt never carries a dangling header.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "(nothing yet - this is a fresh start)".to_string();
        }
        self.entries
            .iter()
            .map(|e| format!("- {}: {}", e.entity_ref, e.summary_text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// TTL-bounded snapshot cache in front of a [`GraphContextStore`].
pub struct ContextCache {
    snapshots: DashMap<(UserId, Wall), ContextSnapshot>,
    ttl: Duration,
    top_k: usize,
}

impl ContextCache {
    pub fn new(ttl_secs: u64, top_k: usize) -> Self {
        Self {
            snapshots: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
            top_k,
        }
    }

    /// Cached snapshot for this pair, or a miss. Staleness is checked
    /// here (lazy expiry); the stale entry is left in place so a
    /// failed refresh can still degrade to it.
    pub fn get(&self, user_id: &UserId, wall: Wall) -> Option<ContextSnapshot> {
        let cached = self.snapshots.get(&(user_id.clone(), wall))?;
        if cached.is_stale(Utc::now()) {
            return None;
        }
        Some(cached.clone())
    }

    /// Cache store results for this pair, replacing any prior
    /// snapshot wholesale.
    pub fn put(&self, user_id: &UserId, wall: Wall, entities: Vec<GraphEntity>) -> ContextSnapshot {
        let now = Utc::now();
        let snapshot = ContextSnapshot {
            entries: rank(entities),
            fetched_at: now,
            ttl_at: now + self.ttl,
        };
        self.snapshots
            .insert((user_id.clone(), wall), snapshot.clone());
        snapshot
    }

    /// Current snapshot for this pair, fetching from the store only
    /// when the cached one is missing or stale. On fetch failure the
    /// previous snapshot (stale included) is served; with no previous
    /// snapshot the turn proceeds with empty context.
    pub async fn snapshot(
        &self,
        store: &dyn GraphContextStore,
        user_id: &UserId,
        wall: Wall,
    ) -> ContextSnapshot {
        if let Some(cached) = self.get(user_id, wall) {
            return cached;
        }

        match store.relevant_entities(user_id, wall, self.top_k).await {
            Ok(entities) => self.put(user_id, wall, entities),
            Err(err) => {
                warn!(user_id = %user_id, wall = %wall, error = %err, "context fetch failed, degrading");
                let now = Utc::now();
                self.snapshots
                    .get(&(user_id.clone(), wall))
                    .map(|s| s.clone())
                    .unwrap_or(ContextSnapshot {
                        entries: Vec::new(),
                        fetched_at: now,
                        ttl_at: now,
                    })
            }
        }
    }

    /// Drop any cached snapshots for this user, forcing the next turn
    /// to re-fetch. Called after extraction lands new graph data.
    pub fn invalidate_user(&self, user_id: &UserId) {
        self.snapshots.retain(|(uid, _), _| uid != user_id);
    }
}

/// Store results arrive relevance-ordered; score decays by position
/// so prompts can distinguish head from tail entries.
fn rank(entities: Vec<GraphEntity>) -> Vec<ContextEntry> {
    let total = entities.len().max(1) as f64;
    entities
        .into_iter()
        .enumerate()
        .map(|(i, e)| ContextEntry {
            entity_ref: e.name,
            relevance_score: 1.0 - (i as f64 / total),
            summary_text: e.summary,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, Result};
    use crate::graph::{EntityKind, ExtractionResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        fetches: AtomicUsize,
        fail: bool,
    }

    impl CountingStore {
        fn new(fail: bool) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                fail,
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GraphContextStore for CountingStore {
        async fn relevant_entities(
            &self,
            _user_id: &UserId,
            _wall: Wall,
            _top_k: usize,
        ) -> Result<Vec<GraphEntity>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::GraphStore {
                    cause: "store down".to_string(),
                });
            }
            Ok(vec![GraphEntity {
                name: "soccer".to_string(),
                kind: EntityKind::Activities,
                summary: "plays midfield on the school team".to_string(),
                last_mentioned: Utc::now(),
            }])
        }

        async fn ingest(&self, _user_id: &UserId, _result: ExtractionResult) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fresh_snapshot_is_served_without_refetch() {
        let store = CountingStore::new(false);
        let cache = ContextCache::new(3600, 20);
        let user = UserId::from("user-1");

        let first = cache.snapshot(&store, &user, Wall::North).await;
        let second = cache.snapshot(&store, &user, Wall::North).await;
        assert_eq!(store.fetch_count(), 1);
        assert_eq!(first.entries, second.entries);
        assert!(first.render().contains("soccer"));
    }

    #[tokio::test]
    async fn stale_snapshot_triggers_exactly_one_fetch() {
        let store = CountingStore::new(false);
        let cache = ContextCache::new(0, 20);
        let user = UserId::from("user-1");

        cache.snapshot(&store, &user, Wall::North).await;
        cache.snapshot(&store, &user, Wall::North).await;
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_empty_context() {
        let store = CountingStore::new(true);
        let cache = ContextCache::new(3600, 20);
        let user = UserId::from("user-1");

        let snapshot = cache.snapshot(&store, &user, Wall::South).await;
        assert!(snapshot.entries.is_empty());
        assert!(snapshot.render().contains("fresh start"));
    }

    #[tokio::test]
    async fn walls_are_cached_independently() {
        let store = CountingStore::new(false);
        let cache = ContextCache::new(3600, 20);
        let user = UserId::from("user-1");

        cache.snapshot(&store, &user, Wall::North).await;
        cache.snapshot(&store, &user, Wall::West).await;
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let store = CountingStore::new(false);
        let cache = ContextCache::new(3600, 20);
        let user = UserId::from("user-1");

        cache.snapshot(&store, &user, Wall::North).await;
        cache.invalidate_user(&user);
        cache.snapshot(&store, &user, Wall::North).await;
        assert_eq!(store.fetch_count(), 2);
    }

    #[test]
    fn get_reports_stale_entries_as_miss() {
        let cache = ContextCache::new(0, 20);
        let user = UserId::from("user-1");
        cache.put(
            &user,
            Wall::North,
            vec![GraphEntity {
                name: "soccer".to_string(),
                kind: EntityKind::Activities,
                summary: "plays midfield".to_string(),
                last_mentioned: Utc::now(),
            }],
        );
        assert!(cache.get(&user, Wall::North).is_none());
    }

    #[test]
    fn rank_decays_by_position() {
        let now = Utc::now();
        let entities = vec![
            GraphEntity {
                name: "a".into(),
                kind: EntityKind::Topics,
                summary: "first".into(),
                last_mentioned: now,
            },
            GraphEntity {
                name: "b".into(),
                kind: EntityKind::Topics,
                summary: "second".into(),
                last_mentioned: now,
            },
        ];
        let ranked = rank(entities);
        assert!(ranked[0].relevance_score > ranked[1].relevance_score);
    }
}
