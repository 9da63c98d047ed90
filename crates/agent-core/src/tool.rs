//! Tool System
//!
//! Contracts between the orchestrator and whatever executes tools:
//!
//! - [`ToolDescriptor`]: what a tool provider advertises
//! - [`ModelToolSpec`]: what the model is shown, produced by [`adapt_catalog`]
//! - [`ToolSession`]: a live connection that lists and runs tools
//!
//! [`ToolRegistry`] is an in-process session backed by [`Tool`] trait objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::message::{Content, ContentPart};

/// Tool as advertised by a tool provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description, may be absent
    #[serde(default)]
    pub description: Option<String>,

    /// JSON Schema for the arguments object
    #[serde(rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: Option<&str>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.map(str::to_owned),
            input_schema,
        }
    }
}

/// Function definition inside a [`ModelToolSpec`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool definition in the chat-completions calling convention
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

impl ModelToolSpec {
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

impl From<&ToolDescriptor> for ModelToolSpec {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            kind: "function".into(),
            function: FunctionSpec {
                name: descriptor.name.clone(),
                description: descriptor.description.clone().unwrap_or_default(),
                parameters: descriptor.input_schema.clone(),
            },
        }
    }
}

/// Translate a provider catalog into model tool specs.
///
/// A missing description becomes `""`. When two descriptors share a name the
/// first one wins.
pub fn adapt_catalog(descriptors: &[ToolDescriptor]) -> Vec<ModelToolSpec> {
    let mut seen = HashSet::new();
    descriptors
        .iter()
        .filter(|d| {
            let fresh = seen.insert(d.name.as_str());
            if !fresh {
                tracing::warn!(tool = %d.name, "Duplicate tool name in catalog, keeping the first");
            }
            fresh
        })
        .map(ModelToolSpec::from)
        .collect()
}

/// Result of one tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Content chunks returned by the tool
    pub content: Vec<ContentPart>,

    /// Whether the provider flagged the result as an error
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            is_error: true,
        }
    }

    /// Text of all textual chunks
    pub fn to_text(&self) -> String {
        Content::Parts(self.content.clone()).as_text()
    }
}

impl From<ToolOutput> for Content {
    fn from(output: ToolOutput) -> Self {
        Self::Parts(output.content)
    }
}

/// A live connection to a tool provider.
///
/// `list_tools` and `call_tool` fail with [`AgentError::NotConnected`] unless
/// `connect` succeeded and `cleanup` has not run since. `cleanup` is
/// idempotent and safe without a prior connect.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Open the connection and perform the handshake
    async fn connect(&mut self, endpoint: &str) -> Result<()>;

    /// Catalog advertised by the provider
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Run one tool; provider-side errors are surfaced, never retried
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput>;

    /// Release everything the connection holds
    async fn cleanup(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// In-process tool, registered in a [`ToolRegistry`]
#[async_trait]
pub trait Tool: Send + Sync {
    /// Descriptor shown to the model
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with given arguments
    async fn execute(&self, arguments: Value) -> Result<ToolOutput>;
}

/// Registry for in-process tools, usable wherever a [`ToolSession`] is expected
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    connected: bool,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            connected: false,
        }
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.descriptor().name;
        if self.tools.insert(name.clone(), Arc::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolSession for ToolRegistry {
    async fn connect(&mut self, endpoint: &str) -> Result<()> {
        tracing::debug!(endpoint, tools = self.len(), "Local tool registry connected");
        self.connected = true;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        if !self.connected {
            return Err(AgentError::NotConnected);
        }
        Ok(self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.descriptor())
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        if !self.connected {
            return Err(AgentError::NotConnected);
        }
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::tool_failed(name, "tool not found"))?;
        tool.execute(arguments).await
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
