//! Conversation Transcript
//!
//! Append-only message log that forms the model's context on every round.
//! The system message is inserted once at construction and never removed.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};

/// Content of the synthetic results closing calls left open by an aborted round
pub const ABORTED_TOOL_CALL_NOTICE: &str = "Tool call was not completed because the previous request failed.";

/// Ordered conversation history with tool-call pairing checks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt.into())],
        }
    }

    /// Append a message.
    ///
    /// Tool messages must answer a call that is still pending, call ids are
    /// unique within an assistant turn, and system messages can only come
    /// from construction.
    pub fn push(&mut self, message: Message) -> Result<()> {
        match message.role {
            Role::System => {
                return Err(AgentError::InvalidTranscript(
                    "system message is fixed at construction".into(),
                ));
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    AgentError::InvalidTranscript("tool message without tool_call_id".into())
                })?;
                if !self.pending_tool_calls().contains(&id) {
                    return Err(AgentError::InvalidTranscript(format!(
                        "tool message answers unknown or already answered call '{id}'"
                    )));
                }
            }
            Role::Assistant => {
                let calls = &message.tool_calls;
                let repeated = calls
                    .iter()
                    .enumerate()
                    .find(|(i, call)| calls[..*i].iter().any(|c| c.id == call.id));
                if let Some((_, call)) = repeated {
                    let id = &call.id;
                    return Err(AgentError::InvalidTranscript(format!(
                        "tool call id '{id}' appears more than once in one turn"
                    )));
                }
            }
            Role::User => {}
        }

        self.messages.push(message);
        Ok(())
    }

    /// IDs of tool calls from the latest assistant turn that have no result yet
    pub fn pending_tool_calls(&self) -> Vec<&str> {
        let Some(turn_idx) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && m.has_tool_calls())
        else {
            return Vec::new();
        };

        let answered: Vec<&str> = self.messages[turn_idx + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        // A later user or assistant message means that turn is over
        if self.messages[turn_idx + 1..]
            .iter()
            .any(|m| m.role != Role::Tool)
        {
            return Vec::new();
        }

        self.messages[turn_idx]
            .tool_calls
            .iter()
            .map(|c| c.id.as_str())
            .filter(|id| !answered.contains(id))
            .collect()
    }

    /// Answer every pending call with a notice so the next model request is valid.
    /// Returns the number of messages appended.
    pub fn close_dangling_tool_calls(&mut self, reason: &str) -> usize {
        let pending: Vec<String> = self
            .pending_tool_calls()
            .into_iter()
            .map(str::to_owned)
            .collect();

        for id in &pending {
            self.messages.push(Message::tool_result(id.clone(), reason));
        }
        pending.len()
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Estimate total tokens in the transcript
    pub fn estimate_tokens(&self) -> u32 {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }

    /// Number of messages, system message included
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
