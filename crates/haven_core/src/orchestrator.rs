//! Conversation orchestrator
//!
//! Owns the connect / message-loop / disconnect lifecycle and
//! coordinates every other component: auth, budget, safety screening
//! on both directions, context assembly, the model call, the ledger,
//! and outbound routing. All cross-component policy lives here; the
//! components themselves stay mechanism-only.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::auth::{BudgetTracker, IdentityVerifier};
use crate::config::PipelineConfig;
use crate::connection::ConnectionRegistry;
use crate::context::ContextCache;
use crate::error::{CoreError, Result};
use crate::graph::{EntityExtractor, GraphContextStore};
use crate::id::{ConnectionId, SessionId, UserId};
use crate::ledger::ConversationLedger;
use crate::message::{Envelope, Message, MessageRole};
use crate::model::CompletionProvider;
use crate::persona::{PersonaRegistry, Wall};
use crate::retry::retry_with_backoff;
use crate::safety::{Direction, SafetyScreen, SafetyVerdict, CRISIS_RESOURCE_REPLY};

/// Notice sent to a connection whose session was superseded by a new
/// connect for the same user.
pub const SUPERSEDED_NOTICE: &str = "This conversation was picked up on another connection.";

/// Notice for a turn the model could not complete.
pub const RETRY_NOTICE: &str =
    "I'm having trouble thinking right now. Give me a second and send that again.";

/// Notice for a refused connect when the daily budget is spent.
pub const BUDGET_NOTICE: &str = "You've used all your time for today. Come back tomorrow!";

struct SessionState {
    user_id: UserId,
    wall: Wall,
    started_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    sequence: AtomicU64,
    turn_lock: Mutex<()>,
    draining: AtomicBool,
}

/// Accepted-connect summary handed back to the transport layer.
#[derive(Debug, Clone)]
pub struct ConnectAccept {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub persona_name: &'static str,
    pub remaining_minutes: u32,
}

/// The pipeline's central state machine. One instance serves every
/// session; per-session state lives in the internal maps.
pub struct ConversationOrchestrator {
    config: PipelineConfig,
    verifier: Arc<dyn IdentityVerifier>,
    budget: Arc<dyn BudgetTracker>,
    safety: Arc<dyn SafetyScreen>,
    provider: Arc<dyn CompletionProvider>,
    graph: Arc<dyn GraphContextStore>,
    extractor: Arc<dyn EntityExtractor>,
    personas: PersonaRegistry,
    ledger: ConversationLedger,
    context: ContextCache,
    connections: ConnectionRegistry,
    sessions: DashMap<SessionId, Arc<SessionState>>,
    active_by_user: DashMap<UserId, SessionId>,
}

impl ConversationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        verifier: Arc<dyn IdentityVerifier>,
        budget: Arc<dyn BudgetTracker>,
        safety: Arc<dyn SafetyScreen>,
        provider: Arc<dyn CompletionProvider>,
        graph: Arc<dyn GraphContextStore>,
        extractor: Arc<dyn EntityExtractor>,
    ) -> Self {
        let context = ContextCache::new(config.context.snapshot_ttl_secs, config.context.top_k);
        let connections = ConnectionRegistry::new(config.session.connection_ttl_secs);
        Self {
            config,
            verifier,
            budget,
            safety,
            provider,
            graph,
            extractor,
            personas: PersonaRegistry::new(),
            ledger: ConversationLedger::new(),
            context,
            connections,
            sessions: DashMap::new(),
            active_by_user: DashMap::new(),
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Authenticate, enforce the daily budget, supersede any prior
    /// session for this user, register the connection, and warm the
    /// context cache. Returns the accepted session summary; the
    /// welcome notice has already been queued on `outbound`.
    pub async fn connect(
        &self,
        token: &str,
        wall: Wall,
        connection_id: ConnectionId,
        outbound: mpsc::Sender<Envelope>,
    ) -> Result<ConnectAccept> {
        let user_id = retry_with_backoff(&self.config.retry.auth, "auth", || {
            self.verifier.verify(token)
        })
        .await?;

        let today = Utc::now().date_naive();
        let remaining = self.budget.remaining_minutes(&user_id, today).await?;
        if remaining == 0 {
            return Err(CoreError::BudgetExhausted {
                user_id: user_id.clone(),
            });
        }

        let now = Utc::now();
        let session_id = SessionId::generate();
        let state = Arc::new(SessionState {
            user_id: user_id.clone(),
            wall,
            started_at: now,
            expires_at: now + Duration::minutes(remaining as i64),
            sequence: AtomicU64::new(0),
            turn_lock: Mutex::new(()),
            draining: AtomicBool::new(false),
        });
        self.sessions.insert(session_id.clone(), state);

        // At most one live session per user: the insert is the atomic
        // check-and-set, and whatever it displaces gets closed.
        if let Some(superseded) = self
            .active_by_user
            .insert(user_id.clone(), session_id.clone())
        {
            info!(user_id = %user_id, old = %superseded, new = %session_id, "superseding session");
            let _ = self
                .connections
                .send_to_session(&superseded, Envelope::notice(superseded.clone(), SUPERSEDED_NOTICE))
                .await;
            self.disconnect(&superseded).await;
        }

        self.connections
            .register(connection_id, session_id.clone(), user_id.clone(), outbound);

        // Warm the snapshot so the first turn doesn't pay the fetch.
        self.context
            .snapshot(self.graph.as_ref(), &user_id, wall)
            .await;

        let persona = self.personas.get(wall);
        let welcome = format!(
            "{} is here with you. You have {} minutes left today.",
            persona.name, remaining
        );
        let _ = self
            .connections
            .send_to_session(&session_id, Envelope::notice(session_id.clone(), welcome))
            .await;

        info!(session_id = %session_id, user_id = %user_id, wall = %wall, "session started");
        Ok(ConnectAccept {
            session_id,
            user_id,
            persona_name: persona.name,
            remaining_minutes: remaining,
        })
    }

    /// Run one conversational turn. Serialized per session; parallel
    /// across sessions.
    pub async fn handle_message(&self, session_id: &SessionId, text: &str) -> Result<()> {
        let state = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| CoreError::SessionNotFound {
                session_id: session_id.clone(),
            })?;

        let _turn = state.turn_lock.lock().await;

        if state.draining.load(Ordering::SeqCst) {
            return Err(CoreError::SessionExpired {
                session_id: session_id.clone(),
            });
        }
        // Budget checked at turn start only, so a turn already in
        // flight when the allotment runs out still completes.
        if Utc::now() >= state.expires_at {
            return Err(CoreError::BudgetExhausted {
                user_id: state.user_id.clone(),
            });
        }
        let remaining = self
            .budget
            .remaining_minutes(&state.user_id, Utc::now().date_naive())
            .await?;
        if remaining == 0 {
            return Err(CoreError::BudgetExhausted {
                user_id: state.user_id.clone(),
            });
        }
        if !self.connections.is_routable(session_id) {
            return Err(CoreError::SessionExpired {
                session_id: session_id.clone(),
            });
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        if trimmed.chars().count() > self.config.safety.max_message_chars {
            let _ = self
                .connections
                .send_to_session(
                    session_id,
                    Envelope::notice(session_id.clone(), "That message is a bit long for me. Can you break it up?"),
                )
                .await;
            return Ok(());
        }

        // Input screening, fail closed: a classifier we cannot reach
        // is treated exactly like a crisis verdict.
        let input_verdict = match retry_with_backoff(&self.config.retry.safety, "safety", || {
            self.safety.classify(trimmed, Direction::Input)
        })
        .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "input screen unavailable, failing closed");
                SafetyVerdict::ClassifierUnavailable
            }
        };

        if let SafetyVerdict::Flagged(_) = input_verdict {
            info!(session_id = %session_id, category = ?input_verdict.category(), "flagged input, turn continues");
        }

        let ledger_ttl = Duration::seconds(self.config.session.ledger_ttl_secs as i64);
        let history = self
            .ledger
            .recent(session_id, self.config.context.history_window);

        let user_seq = state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.append_or_flag(Message::new(
            session_id.clone(),
            user_seq,
            MessageRole::User,
            trimmed.to_string(),
            input_verdict,
            ledger_ttl,
        ))?;

        if input_verdict.routes_to_crisis() {
            return self
                .deliver_resource_reply(session_id, &state, ledger_ttl)
                .await;
        }

        let snapshot = self
            .context
            .snapshot(self.graph.as_ref(), &state.user_id, state.wall)
            .await;
        let prompt = self.personas.get(state.wall).render(&snapshot.render());

        let completion = match retry_with_backoff(&self.config.retry.llm, "completion", || {
            self.provider.complete(&prompt, &history, trimmed)
        })
        .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "completion failed, turn recoverable");
                let _ = self
                    .connections
                    .send_to_session(session_id, Envelope::notice(session_id.clone(), RETRY_NOTICE))
                    .await;
                return Ok(());
            }
        };

        // Output screening, same fail-closed rule. Raw model text is
        // never delivered unscreened.
        let output_verdict = match retry_with_backoff(&self.config.retry.safety, "safety", || {
            self.safety.classify(&completion, Direction::Output)
        })
        .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "output screen unavailable, failing closed");
                SafetyVerdict::ClassifierUnavailable
            }
        };

        if output_verdict.routes_to_crisis() {
            warn!(session_id = %session_id, category = ?output_verdict.category(), "model output suppressed");
            return self
                .deliver_resource_reply(session_id, &state, ledger_ttl)
                .await;
        }

        let reply_seq = state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.append_or_flag(Message::new(
            session_id.clone(),
            reply_seq,
            MessageRole::Assistant,
            completion.clone(),
            output_verdict,
            ledger_ttl,
        ))?;

        match self
            .connections
            .send_to_session(session_id, Envelope::assistant(session_id.clone(), reply_seq, completion))
            .await
        {
            Ok(()) => Ok(()),
            // Client vanished between screening and delivery. Expected
            // and non-fatal; the reply is simply dropped.
            Err(CoreError::NoActiveConnection { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// End a session. Idempotent: the first call drains and extracts,
    /// later calls are no-ops. The session is always torn down, even
    /// when the budget charge or graph write fails; those are logged
    /// and the work is dropped rather than stranding the session.
    pub async fn disconnect(&self, session_id: &SessionId) {
        let Some(state) = self.sessions.get(session_id).map(|s| s.clone()) else {
            return;
        };
        if state.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        self.connections.remove_session(session_id);
        self.active_by_user
            .remove_if(&state.user_id, |_, active| active == session_id);

        // Every session costs at least one minute of the allotment.
        let elapsed = Utc::now() - state.started_at;
        let minutes = (elapsed.num_seconds().max(0) as u32).div_ceil(60).max(1);
        if let Err(err) = self
            .budget
            .consume(&state.user_id, state.started_at.date_naive(), minutes)
            .await
        {
            warn!(session_id = %session_id, minutes, error = %err, "budget charge failed");
        }

        let transcript = self.ledger.take_session(session_id);
        if !transcript.is_empty() {
            // Extraction and ingest are best-effort enrichment; losing
            // one session's graph delta never blocks teardown.
            match self.extractor.extract(&state.user_id, &transcript).await {
                Ok(result) if !result.is_empty() => {
                    match self.graph.ingest(&state.user_id, result).await {
                        Ok(()) => self.context.invalidate_user(&state.user_id),
                        Err(err) => {
                            warn!(session_id = %session_id, error = %err, "graph ingest failed");
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "extraction failed");
                }
            }
        }

        self.sessions.remove(session_id);
        info!(session_id = %session_id, turns = transcript.len(), "session destroyed");
    }

    async fn deliver_resource_reply(
        &self,
        session_id: &SessionId,
        state: &SessionState,
        ledger_ttl: Duration,
    ) -> Result<()> {
        let reply_seq = state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.append_or_flag(Message::new(
            session_id.clone(),
            reply_seq,
            MessageRole::Assistant,
            CRISIS_RESOURCE_REPLY.to_string(),
            SafetyVerdict::Clear,
            ledger_ttl,
        ))?;
        match self
            .connections
            .send_to_session(
                session_id,
                Envelope::assistant(session_id.clone(), reply_seq, CRISIS_RESOURCE_REPLY),
            )
            .await
        {
            Ok(()) | Err(CoreError::NoActiveConnection { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// Ledger writes only conflict on an orchestrator bug; log loudly
    /// and reject the turn rather than masking it.
    fn append_or_flag(&self, message: Message) -> Result<()> {
        self.ledger.append(message).inspect_err(|err| {
            error!(error = %err, "ledger rejected write");
        })
    }
}
