//! MCP transport layer

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::Url;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{McpError, Result};

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, message: Value) -> Result<()>;

    /// Next inbound message; `None` once the connection is gone
    async fn receive(&mut self) -> Result<Option<Value>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: Value) -> Result<()> {
        (**self).send(message).await
    }

    async fn receive(&mut self) -> Result<Option<Value>> {
        (**self).receive().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

const INBOX_CAPACITY: usize = 64;

/// SSE transport: `GET` opens the event stream, the server names a POST
/// endpoint in its first `endpoint` event, and responses come back as
/// `message` events.
pub struct SseTransport {
    http: reqwest::Client,
    post_url: Url,
    inbox: mpsc::Receiver<Value>,
    reader: Option<JoinHandle<()>>,
}

impl SseTransport {
    /// Open the stream and wait for the endpoint announcement
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(url).map_err(|e| McpError::Transport(format!("invalid url '{url}': {e}")))?;
        let http = reqwest::Client::new();

        let response = tokio::time::timeout(
            timeout,
            http.get(base.clone()).header(ACCEPT, "text/event-stream").send(),
        )
        .await
        .map_err(|_| McpError::Timeout(timeout))??
        .error_for_status()?;

        let mut events = Box::pin(response.bytes_stream().eventsource());

        let endpoint = tokio::time::timeout(timeout, wait_for_endpoint(&mut events))
            .await
            .map_err(|_| McpError::Timeout(timeout))??;

        let post_url = base
            .join(endpoint.trim())
            .map_err(|e| McpError::Protocol(format!("bad endpoint '{endpoint}': {e}")))?;
        tracing::debug!(%post_url, "SSE endpoint announced");

        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let reader = tokio::spawn(read_events(events, tx));

        Ok(Self {
            http,
            post_url,
            inbox,
            reader: Some(reader),
        })
    }

    /// URL requests are posted to
    pub const fn post_url(&self) -> &Url {
        &self.post_url
    }
}

async fn wait_for_endpoint<S, E>(events: &mut S) -> Result<String>
where
    S: Stream<Item = std::result::Result<Event, EventStreamError<E>>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(event) = events.next().await {
        let event = event.map_err(McpError::transport)?;
        if event.event == "endpoint" {
            return Ok(event.data);
        }
        tracing::debug!(event = %event.event, "Ignoring SSE event before endpoint");
    }
    Err(McpError::Transport("event stream ended before endpoint event".into()))
}

async fn read_events<S, E>(mut events: S, tx: mpsc::Sender<Value>)
where
    S: Stream<Item = std::result::Result<Event, EventStreamError<E>>> + Unpin + Send + 'static,
    E: std::fmt::Display + Send,
{
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "SSE stream error");
                break;
            }
        };

        if event.event != "message" && !event.event.is_empty() {
            tracing::debug!(event = %event.event, "Ignoring SSE event");
            continue;
        }

        match serde_json::from_str::<Value>(&event.data) {
            Ok(value) => {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, data = %event.data, "Dropping malformed SSE message"),
        }
    }
    tracing::debug!("SSE stream closed");
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, message: Value) -> Result<()> {
        if self.reader.is_none() {
            return Err(McpError::Transport("transport closed".into()));
        }

        self.http
            .post(self.post_url.clone())
            .json(&message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Value>> {
        Ok(self.inbox.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            self.inbox.close();
            tracing::debug!("SSE transport closed");
        }
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
