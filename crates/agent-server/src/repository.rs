//! Chat history storage
//!
//! One record per completed exchange. Backs the chat list and chat history
//! endpoints; the transcript itself lives in the session store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use agent_core::Result;

/// One user message and the answer it got
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub session_id: String,
    pub user_id: Option<String>,
    pub user_message: String,
    pub assistant_message: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(
        session_id: impl Into<String>,
        user_id: Option<String>,
        user_message: impl Into<String>,
        assistant_message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            user_message: user_message.into(),
            assistant_message: assistant_message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Entry of a user's chat list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub session_id: String,
    /// First user message of the chat
    pub title: String,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn save(&self, record: ConversationRecord) -> Result<()>;

    /// Chats of one user, newest first
    async fn list_chats(&self, user_id: &str) -> Result<Vec<ChatSummary>>;

    /// Exchanges of one chat, oldest first
    async fn messages(&self, session_id: &str) -> Result<Vec<ConversationRecord>>;
}

/// In-memory repository (for development/testing)
#[derive(Default)]
pub struct MemoryConversationRepository {
    records: RwLock<Vec<ConversationRecord>>,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn save(&self, record: ConversationRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn list_chats(&self, user_id: &str) -> Result<Vec<ChatSummary>> {
        let records = self.records.read().await;
        let mut mine: Vec<_> = records
            .iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .collect();
        mine.sort_by_key(|r| r.created_at);

        // Earliest record of each session opens the chat
        let mut chats: Vec<ChatSummary> = Vec::new();
        for record in mine {
            if chats.iter().any(|c| c.session_id == record.session_id) {
                continue;
            }
            chats.push(ChatSummary {
                session_id: record.session_id.clone(),
                title: record.user_message.clone(),
                started_at: record.created_at,
            });
        }

        chats.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(chats)
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<ConversationRecord>> {
        let mut messages: Vec<_> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }
}
