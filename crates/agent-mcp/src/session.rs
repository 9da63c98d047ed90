//! MCP-backed tool session

use agent_core::{AgentError, ToolDescriptor, ToolOutput, ToolSession};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::client::{ClientInfo, McpClient};
use crate::transport::{SseTransport, Transport};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`ToolSession`] over an MCP server reached through SSE
pub struct McpSession {
    client: Option<McpClient<Box<dyn Transport>>>,
}

impl Default for McpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl McpSession {
    pub fn new() -> Self {
        Self { client: None }
    }

    /// Run the handshake over an already open transport
    pub async fn attach(&mut self, transport: Box<dyn Transport>) -> agent_core::Result<()> {
        if self.client.is_some() {
            self.cleanup().await?;
        }

        let mut client = McpClient::new(transport);
        match client.initialize(&ClientInfo::default()).await {
            Ok(server) => {
                tracing::info!(
                    server = %server.name,
                    version = %server.version,
                    protocol = %server.protocol_version,
                    "MCP session initialized"
                );
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    tracing::warn!(error = %close_err, "Failed to close transport after handshake error");
                }
                Err(AgentError::ConnectionFailed(format!("MCP handshake failed: {e}")))
            }
        }
    }

    fn client(&self) -> agent_core::Result<&McpClient<Box<dyn Transport>>> {
        self.client.as_ref().ok_or(AgentError::NotConnected)
    }
}

#[async_trait]
impl ToolSession for McpSession {
    async fn connect(&mut self, endpoint: &str) -> agent_core::Result<()> {
        tracing::info!(endpoint, "Connecting to MCP server");
        let transport = SseTransport::connect(endpoint, CONNECT_TIMEOUT)
            .await
            .map_err(|e| AgentError::ConnectionFailed(format!("{endpoint}: {e}")))?;
        self.attach(Box::new(transport)).await
    }

    async fn list_tools(&self) -> agent_core::Result<Vec<ToolDescriptor>> {
        self.client()?
            .list_tools()
            .await
            .map_err(|e| AgentError::Other(format!("tools/list failed: {e}")))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> agent_core::Result<ToolOutput> {
        let result = self
            .client()?
            .call_tool(name, arguments)
            .await
            .map_err(|e| AgentError::tool_failed(name, e.to_string()))?;

        Ok(ToolOutput {
            content: result.content,
            is_error: result.is_error,
        })
    }

    async fn cleanup(&mut self) -> agent_core::Result<()> {
        // Client state goes first; McpClient::close shuts the transport last
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| AgentError::Other(format!("failed to close MCP transport: {e}")))?;
            tracing::info!("MCP session closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}
