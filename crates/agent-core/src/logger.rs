//! Transcript Logger
//!
//! Audit trail of conversations. Every call writes a complete snapshot of the
//! transcript, never a diff.
//!
//! Snapshot files are named after the local time to the second, so two
//! snapshots taken within the same second overwrite each other. That is
//! acceptable for an audit log and nothing reads these files back.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::message::{Message, Role};

/// Persisted form of one message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub role: Role,
    /// String, or an array of plain JSON chunks
    pub content: Value,
}

/// Flatten a transcript to its persisted form
pub fn snapshot(messages: &[Message]) -> Vec<LoggedMessage> {
    messages
        .iter()
        .map(|m| LoggedMessage {
            role: m.role,
            content: m
                .content
                .as_ref()
                .map_or(Value::Null, crate::message::Content::to_plain),
        })
        .collect()
}

/// Durable sink for transcript snapshots
#[async_trait]
pub trait TranscriptLogger: Send + Sync {
    async fn persist(&self, messages: &[Message]) -> Result<()>;
}

/// Writes `conversation_<timestamp>.json` files into a directory
#[derive(Clone, Debug)]
pub struct FileTranscriptLogger {
    dir: PathBuf,
}

impl FileTranscriptLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Snapshot file for a given moment
    pub fn path_at(&self, time: DateTime<Local>) -> PathBuf {
        let timestamp = time.format("%Y-%m-%d_%H-%M-%S");
        self.dir.join(format!("conversation_{timestamp}.json"))
    }

    async fn write_snapshot(&self, path: &Path, messages: &[Message]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let body = serde_json::to_vec_pretty(&snapshot(messages))?;
        tokio::fs::write(path, body).await?;

        tracing::debug!(path = %path.display(), messages = messages.len(), "Transcript snapshot written");
        Ok(())
    }
}

#[async_trait]
impl TranscriptLogger for FileTranscriptLogger {
    async fn persist(&self, messages: &[Message]) -> Result<()> {
        let path = self.path_at(Local::now());
        self.write_snapshot(&path, messages).await
    }
}
