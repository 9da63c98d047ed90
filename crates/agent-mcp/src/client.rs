//! MCP Client implementation

use agent_core::ToolDescriptor;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::PROTOCOL_VERSION;
use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolResult, Incoming, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, RequestId, methods,
};
use crate::transport::Transport;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

/// MCP Client for connecting to MCP servers.
///
/// One request is in flight at a time: the transport lock is held from send
/// until the matching response arrives.
pub struct McpClient<T: Transport> {
    transport: Arc<Mutex<T>>,
    request_id: AtomicI64,
    server_info: Option<ServerInfo>,
}

impl<T: Transport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            request_id: AtomicI64::new(1),
            server_info: None,
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Handshake: `initialize`, then the `initialized` notification
    pub async fn initialize(&mut self, client_info: &ClientInfo) -> Result<ServerInfo> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_info.name,
                "version": client_info.version
            }
        });

        let result = self.request(methods::INITIALIZE, Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        if init.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                server = %init.protocol_version,
                client = PROTOCOL_VERSION,
                "MCP protocol version mismatch"
            );
        }

        self.notify(methods::INITIALIZED).await?;

        let info = ServerInfo {
            name: init.server_info.name,
            version: init.server_info.version,
            protocol_version: init.protocol_version,
        };
        self.server_info = Some(info.clone());
        Ok(info)
    }

    /// List available tools, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request(methods::TOOLS_LIST, params).await?;
            let page: ListToolsResult = serde_json::from_value(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if cursor.as_deref() == Some(next.as_str()) {
                        return Err(McpError::Protocol(format!("tools/list cursor '{next}' repeated")));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call a tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = json!({
            "name": name,
            "arguments": arguments
        });
        let result = self.request(methods::TOOLS_CALL, Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Release the client, then close the transport under it
    pub async fn close(self) -> Result<()> {
        let Self {
            transport,
            server_info,
            ..
        } = self;
        if let Some(info) = server_info {
            tracing::debug!(server = %info.name, "Releasing MCP client");
        }

        let mut transport = transport.lock().await;
        transport.close().await
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let message = serde_json::to_value(JsonRpcNotification::new(method))?;
        self.transport.lock().await.send(message).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let mut request = JsonRpcRequest::new(self.next_id(), method);
        if let Some(params) = params {
            request = request.with_params(params);
        }
        tracing::debug!(%method, id = %request.id, "MCP request");

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.send_request(request))
            .await
            .map_err(|_| McpError::Timeout(REQUEST_TIMEOUT))??;
        response.into_result()
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut transport = self.transport.lock().await;

        let id = request.id.clone();
        transport.send(serde_json::to_value(&request)?).await?;

        loop {
            let value = transport
                .receive()
                .await?
                .ok_or_else(|| McpError::Transport("Connection closed".into()))?;

            match Incoming::classify(value) {
                Ok(Incoming::Response(response)) if response.id.as_ref() == Some(&id) => {
                    return Ok(response);
                }
                Ok(Incoming::Response(response)) => {
                    tracing::warn!(expected = %id, got = ?response.id, "Skipping response for another request");
                }
                Ok(Incoming::Other(method)) => {
                    tracing::debug!(%method, "Skipping server message while awaiting response");
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unrecognized message"),
            }
        }
    }
}
