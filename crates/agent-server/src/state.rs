//! Application State

use std::sync::Arc;

use agent_core::{Orchestrator, SessionStore};
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::repository::ConversationRepository;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Chat rounds take the read lock; shutdown cleanup takes the write lock
    pub orchestrator: Arc<RwLock<Orchestrator>>,

    /// Per-conversation transcripts
    pub sessions: Arc<SessionStore>,

    /// Chat history for the list/messages endpoints
    pub repository: Arc<dyn ConversationRepository>,

    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        config: AppConfig,
        repository: Arc<dyn ConversationRepository>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(RwLock::new(orchestrator)),
            sessions: Arc::new(SessionStore::with_limits(
                config.session_idle_ttl,
                config.max_sessions,
            )),
            repository,
            config: Arc::new(config),
        }
    }
}
