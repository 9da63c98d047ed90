//! Session Management
//!
//! Each conversation owns its transcript. The store hands out one
//! `Arc<Mutex<Session>>` per session id, so rounds on the same conversation
//! are serialized while different conversations run concurrently.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::transcript::Transcript;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One conversation and its transcript
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    /// Owner, when the caller identified one
    pub user_id: Option<String>,

    pub transcript: Transcript,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: None,
            transcript: Transcript::new(system_prompt),
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Idle time after which a session may be evicted
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Sessions kept before the least recently active one is evicted
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

type SessionMap = HashMap<SessionId, Arc<Mutex<Session>>>;

/// In-memory session store.
///
/// Bounded two ways: sessions idle longer than the TTL are swept, and
/// creating a session beyond capacity evicts the least recently active one.
/// Sessions whose lock is held by a running round are never evicted.
pub struct SessionStore {
    sessions: RwLock<SessionMap>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SESSION_IDLE_TTL, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Look up a session, creating it (with a fresh id when none is given)
    pub async fn get_or_create(
        &self,
        id: Option<SessionId>,
        user_id: Option<&str>,
        system_prompt: &str,
    ) -> (SessionId, Arc<Mutex<Session>>) {
        let id = id.unwrap_or_default();

        if let Some(existing) = self.sessions.read().await.get(&id) {
            return (id, existing.clone());
        }

        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&id) {
            self.make_room(&mut sessions);
        }
        let session = sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!(session_id = %id, "Creating session");
                let mut session = Session::new(id.clone(), system_prompt);
                session.user_id = user_id.map(str::to_owned);
                Arc::new(Mutex::new(session))
            })
            .clone();
        (id, session)
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drop sessions idle longer than the TTL. Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        self.evict_expired(&mut sessions)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn evict_expired(&self, sessions: &mut SessionMap) -> usize {
        let Some(cutoff) = TimeDelta::from_std(self.idle_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let before = sessions.len();
        sessions.retain(|_, session| {
            session
                .try_lock()
                .map_or(true, |session| session.updated_at >= cutoff)
        });
        before - sessions.len()
    }

    /// Free a slot for one new session
    fn make_room(&self, sessions: &mut SessionMap) {
        let mut evicted = self.evict_expired(sessions);

        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter_map(|(id, session)| {
                    session.try_lock().ok().map(|s| (s.updated_at, id.clone()))
                })
                .min();
            let Some((_, id)) = oldest else {
                break;
            };
            sessions.remove(&id);
            evicted += 1;
        }

        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "Evicted sessions");
        }
    }
}
