//! Conversation Messages
//!
//! Standard message format used across the agent system. Messages carry either
//! plain text or a list of structured [`ContentPart`]s (what a tool provider
//! returns), plus the tool-call bookkeeping the chat protocol needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result, keyed by `tool_call_id`
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// One chunk of structured content.
///
/// Known chunk kinds are decoded into their own variant; anything else a
/// provider sends is kept verbatim in [`ContentPart::Other`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ContentPart {
    Text { text: String },
    Image { data: String, mime_type: String },
    Resource { resource: Value },
    Other(Value),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Plain JSON form used for persistence and for the wire.
    pub fn to_plain(&self) -> Value {
        match self {
            Self::Text { text } => json!({ "type": "text", "text": text }),
            Self::Image { data, mime_type } => {
                json!({ "type": "image", "data": data, "mimeType": mime_type })
            }
            Self::Resource { resource } => json!({ "type": "resource", "resource": resource }),
            Self::Other(value) => value.clone(),
        }
    }

    /// Textual rendering, if this chunk has one
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Resource { resource } => resource.get("text").and_then(Value::as_str),
            Self::Image { .. } | Self::Other(_) => None,
        }
    }
}

impl From<Value> for ContentPart {
    fn from(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str);
        let str_field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_owned);

        match kind {
            Some("text") => {
                if let Some(text) = str_field("text") {
                    return Self::Text { text };
                }
            }
            Some("image") => {
                if let (Some(data), Some(mime_type)) = (str_field("data"), str_field("mimeType")) {
                    return Self::Image { data, mime_type };
                }
            }
            Some("resource") => {
                if let Some(resource) = value.get("resource") {
                    return Self::Resource {
                        resource: resource.clone(),
                    };
                }
            }
            _ => {}
        }

        Self::Other(value)
    }
}

impl From<ContentPart> for Value {
    fn from(part: ContentPart) -> Self {
        match part {
            ContentPart::Other(value) => value,
            other => other.to_plain(),
        }
    }
}

/// Message body: a plain string or structured chunks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Flatten to text; structured chunks without a textual form are skipped
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Plain JSON form: strings stay strings, chunks become plain objects
    pub fn to_plain(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Parts(parts) => Value::Array(parts.iter().map(ContentPart::to_plain).collect()),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// A structured tool invocation emitted by the model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call ID, echoed back in the matching tool message
    pub id: String,

    /// Tool name from the catalog
    pub name: String,

    /// JSON-encoded argument object, exactly as the model produced it
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Decode the arguments into a JSON object. An empty string means `{}`.
    pub fn parse_arguments(&self) -> Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(json!({}));
        }

        let value: Value = serde_json::from_str(&self.arguments).map_err(|e| {
            AgentError::tool_failed(&self.name, format!("invalid arguments: {e}"))
        })?;

        if !value.is_object() {
            return Err(AgentError::tool_failed(
                &self.name,
                "arguments must be a JSON object",
            ));
        }

        Ok(value)
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Body; `None` for assistant turns that only carry tool calls
    #[serde(default)]
    pub content: Option<Content>,

    /// Tool call this message answers (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls requested by the model (assistant messages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn requesting tools; leading text is kept when present
    pub fn assistant_with_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.map(Content::Text),
            tool_call_id: None,
            tool_calls: calls,
            timestamp: Utc::now(),
        }
    }

    /// Create a tool result message
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Text of the body, empty when there is none
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::as_text).unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Estimate token count (rough approximation)
    pub fn estimate_tokens(&self) -> u32 {
        let args: usize = self.tool_calls.iter().map(|c| c.arguments.len()).sum();
        // ~4 characters per token is a rough estimate
        u32::try_from((self.text().len() + args) / 4).unwrap_or(u32::MAX).saturating_add(4)
    }
}
