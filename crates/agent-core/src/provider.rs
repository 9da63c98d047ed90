//! LLM Provider Strategy Pattern
//!
//! Defines the Model Invoker contract: one request carrying the transcript and
//! the tool catalog, answered by either final text or a batch of tool calls.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{GenerationOptions, LlmProvider, ModelTurn};
//!
//! let completion = provider.invoke(transcript.messages(), &specs, &options).await?;
//! match completion.turn {
//!     ModelTurn::Text { content } => println!("{content}"),
//!     ModelTurn::ToolCalls { calls, .. } => run(calls).await?,
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, ToolCallRequest};
use crate::tool::ModelToolSpec;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o-mini")
    pub model: String,

    /// Temperature for sampling; provider default when unset
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate; provider default when unset
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// What the model decided to do this turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelTurn {
    /// Final answer
    Text { content: String },

    /// Tools to run before the model continues; `content` is any leading text
    ToolCalls {
        calls: Vec<ToolCallRequest>,
        content: Option<String>,
    },
}

impl ModelTurn {
    /// A non-empty call list makes this a tool-call turn, whatever the text says
    pub fn from_parts(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        if calls.is_empty() {
            Self::Text {
                content: content.unwrap_or_default(),
            }
        } else {
            Self::ToolCalls { calls, content }
        }
    }

    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }
}

/// Response from an LLM invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// Decoded turn
    pub turn: ModelTurn,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs and health output
    fn name(&self) -> &str;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// One round trip to the model; no retries. Failures are
    /// [`crate::AgentError::ModelInvocationFailed`].
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ModelToolSpec],
        options: &GenerationOptions,
    ) -> Result<Completion>;
}
