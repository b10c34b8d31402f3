//! Application state

use std::sync::Arc;

use haven_core::local::{
    HeuristicExtractor, LocalBudgetTracker, LocalGraphStore, StaticTokenVerifier,
};
use haven_core::{ConversationOrchestrator, GenAiProvider, KeywordScreen, PipelineConfig};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConversationOrchestrator>,
}

impl AppState {
    /// Wire the pipeline with the in-process collaborators and the
    /// genai-backed completion provider.
    pub fn new(config: PipelineConfig) -> Self {
        let daily_budget = config.session.daily_budget_minutes;
        let model = config.model.clone();
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            config,
            Arc::new(StaticTokenVerifier::dev_mode()),
            Arc::new(LocalBudgetTracker::new(daily_budget)),
            Arc::new(KeywordScreen::new()),
            Arc::new(GenAiProvider::new(model)),
            Arc::new(LocalGraphStore::new()),
            Arc::new(HeuristicExtractor::new()),
        ));
        Self { orchestrator }
    }
}
