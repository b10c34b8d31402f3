//! Connection registry
//!
//! Maps live transport connections to their outbound channels and
//! indexes them by session so the pipeline can route replies without
//! holding transport handles. Entries carry a sliding TTL refreshed on
//! every touch; expiry is lazy, checked at routing time.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::id::{ConnectionId, SessionId, UserId};
use crate::message::Envelope;

struct ConnectionEntry {
    session_id: SessionId,
    user_id: UserId,
    outbound: mpsc::Sender<Envelope>,
    expires_at: DateTime<Utc>,
}

/// Registry of live connections with a session index.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    by_session: DashMap<SessionId, ConnectionId>,
    ttl: Duration,
}

impl ConnectionRegistry {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            connections: DashMap::new(),
            by_session: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Register a connection and index it under its session. If the
    /// session already had a connection, the old one is unindexed
    /// (its entry dies on its next TTL check or explicit remove).
    pub fn register(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
        user_id: UserId,
        outbound: mpsc::Sender<Envelope>,
    ) {
        let entry = ConnectionEntry {
            session_id: session_id.clone(),
            user_id,
            outbound,
            expires_at: Utc::now() + self.ttl,
        };
        if let Some(previous) = self.by_session.insert(session_id, connection_id.clone()) {
            self.connections.remove(&previous);
        }
        self.connections.insert(connection_id, entry);
    }

    /// Slide the TTL forward. No-op for unknown connections.
    pub fn touch(&self, connection_id: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(connection_id) {
            entry.expires_at = Utc::now() + self.ttl;
        }
    }

    /// Identify who a connection serves. Expired entries are reaped
    /// here and reported as absent.
    pub fn resolve(&self, connection_id: &ConnectionId) -> Option<(UserId, SessionId)> {
        let expired = {
            let entry = self.connections.get(connection_id)?;
            if entry.expires_at > Utc::now() {
                return Some((entry.user_id.clone(), entry.session_id.clone()));
            }
            entry.session_id.clone()
        };
        self.connections.remove(connection_id);
        self.by_session
            .remove_if(&expired, |_, c| c == connection_id);
        None
    }

    /// Send an envelope to the session's live connection. Expired
    /// entries are removed here and reported as no active connection.
    pub async fn send_to_session(&self, session_id: &SessionId, envelope: Envelope) -> Result<()> {
        let sender = {
            let connection_id = self.by_session.get(session_id).map(|c| c.clone());
            let Some(connection_id) = connection_id else {
                return Err(CoreError::NoActiveConnection {
                    session_id: session_id.clone(),
                });
            };
            match self.connections.get(&connection_id) {
                Some(entry) if entry.expires_at > Utc::now() => entry.outbound.clone(),
                Some(_) => {
                    drop(self.connections.remove(&connection_id));
                    self.by_session.remove(session_id);
                    debug!(session_id = %session_id, "connection expired at routing time");
                    return Err(CoreError::NoActiveConnection {
                        session_id: session_id.clone(),
                    });
                }
                None => {
                    self.by_session.remove(session_id);
                    return Err(CoreError::NoActiveConnection {
                        session_id: session_id.clone(),
                    });
                }
            }
        };

        sender
            .send(envelope)
            .await
            .map_err(|_| CoreError::NoActiveConnection {
                session_id: session_id.clone(),
            })
    }

    /// Whether the session currently has a live, unexpired connection.
    pub fn is_routable(&self, session_id: &SessionId) -> bool {
        let Some(connection_id) = self.by_session.get(session_id) else {
            return false;
        };
        self.connections
            .get(&connection_id)
            .map(|e| e.expires_at > Utc::now())
            .unwrap_or(false)
    }

    /// Remove whatever connection currently serves this session.
    /// Dropping the entry drops its outbound sender, which ends the
    /// transport's writer task.
    pub fn remove_session(&self, session_id: &SessionId) -> Option<ConnectionId> {
        let (_, connection_id) = self.by_session.remove(session_id)?;
        self.connections.remove(&connection_id);
        Some(connection_id)
    }

    /// Remove a connection and its session index entry. Returns the
    /// session it served, if it was still the indexed connection.
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<SessionId> {
        let (_, entry) = self.connections.remove(connection_id)?;
        let still_indexed = self
            .by_session
            .get(&entry.session_id)
            .map(|c| *c == *connection_id)
            .unwrap_or(false);
        if still_indexed {
            self.by_session.remove(&entry.session_id);
            Some(entry.session_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Envelope;

    fn ids() -> (ConnectionId, SessionId, UserId) {
        (
            ConnectionId::generate(),
            SessionId::generate(),
            UserId::from("u1"),
        )
    }

    #[tokio::test]
    async fn routes_to_registered_connection() {
        let registry = ConnectionRegistry::new(1800);
        let (conn, session, user) = ids();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(conn, session.clone(), user, tx);

        registry
            .send_to_session(&session, Envelope::notice(session.clone(), "hello"))
            .await
            .unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.text, "hello");
    }

    #[tokio::test]
    async fn resolve_returns_owner_and_reaps_expired() {
        let live = ConnectionRegistry::new(1800);
        let (conn, session, user) = ids();
        let (tx, _rx) = mpsc::channel(8);
        live.register(conn.clone(), session.clone(), user.clone(), tx);
        assert_eq!(live.resolve(&conn), Some((user, session)));

        let expired = ConnectionRegistry::new(0);
        let (conn, session, user) = ids();
        let (tx, _rx) = mpsc::channel(8);
        expired.register(conn.clone(), session.clone(), user, tx);
        assert_eq!(expired.resolve(&conn), None);
        assert!(!expired.is_routable(&session));
    }

    #[tokio::test]
    async fn unknown_session_is_not_routable() {
        let registry = ConnectionRegistry::new(1800);
        let session = SessionId::generate();
        assert!(!registry.is_routable(&session));
        let err = registry
            .send_to_session(&session, Envelope::notice(session.clone(), "x"))
            .await;
        assert!(matches!(err, Err(CoreError::NoActiveConnection { .. })));
    }

    #[tokio::test]
    async fn expired_connection_is_dropped_at_routing() {
        let registry = ConnectionRegistry::new(0);
        let (conn, session, user) = ids();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(conn, session.clone(), user, tx);

        let err = registry
            .send_to_session(&session, Envelope::notice(session.clone(), "x"))
            .await;
        assert!(matches!(err, Err(CoreError::NoActiveConnection { .. })));
        assert!(!registry.is_routable(&session));
    }

    #[tokio::test]
    async fn new_connection_supersedes_old_for_same_session() {
        let registry = ConnectionRegistry::new(1800);
        let session = SessionId::generate();
        let user = UserId::from("u1");

        let old_conn = ConnectionId::generate();
        let (old_tx, mut old_rx) = mpsc::channel(8);
        registry.register(old_conn.clone(), session.clone(), user.clone(), old_tx);

        let new_conn = ConnectionId::generate();
        let (new_tx, mut new_rx) = mpsc::channel(8);
        registry.register(new_conn, session.clone(), user, new_tx);

        registry
            .send_to_session(&session, Envelope::notice(session.clone(), "hi"))
            .await
            .unwrap();
        assert!(new_rx.recv().await.is_some());
        assert!(old_rx.try_recv().is_err());

        // Removing the superseded connection must not unindex the live one.
        assert!(registry.remove(&old_conn).is_none());
        assert!(registry.is_routable(&session));
    }

    #[tokio::test]
    async fn remove_returns_session_and_clears_index() {
        let registry = ConnectionRegistry::new(1800);
        let (conn, session, user) = ids();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(conn.clone(), session.clone(), user, tx);

        assert_eq!(registry.remove(&conn), Some(session.clone()));
        assert!(!registry.is_routable(&session));
        assert!(registry.remove(&conn).is_none());
    }
}
