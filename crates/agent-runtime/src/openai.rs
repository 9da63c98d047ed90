//! OpenAI-compatible LLM Provider
//!
//! Implementation of `LlmProvider` for the chat-completions API with native
//! tool calling. Any server speaking the same protocol (a local Ollama `/v1`
//! endpoint, vLLM, LiteLLM) works by pointing `base_url` at it.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role, ToolCallRequest},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelTurn, TokenUsage},
    tool::ModelToolSpec,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API root, without the `/v1` suffix
    pub base_url: String,

    /// Bearer token; omitted from requests when unset
    pub api_key: Option<String>,

    /// Default model
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url);
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        let model = std::env::var("OPENAI_MODEL").unwrap_or(defaults.model);
        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Self {
            base_url,
            api_key,
            model,
            timeout_secs,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url.trim_end_matches('/'))
    }
}

/// OpenAI chat-completions provider
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create from configuration
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env())
    }

    pub const fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Convert transcript messages to chat-completions format
    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let text = m.content.as_ref().map(|c| c.as_text());
                match m.role {
                    Role::Assistant => ChatMessage {
                        role: "assistant",
                        // Tool-call turns may legitimately have no text
                        content: text.filter(|t| !t.is_empty() || !m.has_tool_calls()),
                        tool_calls: m
                            .tool_calls
                            .iter()
                            .map(|call| ChatToolCall {
                                id: call.id.clone(),
                                kind: "function".into(),
                                function: ChatFunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.clone(),
                                },
                            })
                            .collect(),
                        tool_call_id: None,
                    },
                    Role::Tool => ChatMessage {
                        role: "tool",
                        content: Some(text.unwrap_or_default()),
                        tool_calls: Vec::new(),
                        tool_call_id: m.tool_call_id.clone(),
                    },
                    Role::System | Role::User => ChatMessage {
                        role: if m.role == Role::System { "system" } else { "user" },
                        content: Some(text.unwrap_or_default()),
                        tool_calls: Vec::new(),
                        tool_call_id: None,
                    },
                }
            })
            .collect()
    }

    /// Convert a chat-completions response into a completion
    fn convert_response(response: ChatResponse, requested_model: &str) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ModelInvocationFailed("response has no choices".into()))?;

        let calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCallRequest::new(call.id, call.function.name, call.function.arguments))
            .collect();

        Ok(Completion {
            turn: ModelTurn::from_parts(choice.message.content, calls),
            model: response.model.unwrap_or_else(|| requested_model.to_string()),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> Result<bool> {
        let request = self.authorize(self.client.get(self.config.endpoint("models")));
        match request.send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                tracing::warn!(status = %response.status(), "OpenAI health check failed");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(error = %e, "OpenAI health check failed");
                Ok(false)
            }
        }
    }

    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ModelToolSpec],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = ChatRequest {
            model: &options.model,
            messages: Self::convert_messages(messages),
            tools,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .authorize(self.client.post(self.config.endpoint("chat/completions")))
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::ModelInvocationFailed(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ModelInvocationFailed(format!("{status}: {e}")))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_owned);
            return Err(AgentError::ModelInvocationFailed(format!("{status}: {message}")));
        }
        if status != StatusCode::OK {
            return Err(AgentError::ModelInvocationFailed(format!("{status}: {body}")));
        }

        let parsed: ChatResponse = serde_json::from_value(body)
            .map_err(|e| AgentError::ModelInvocationFailed(format!("unexpected response: {e}")))?;
        let completion = Self::convert_response(parsed, &options.model)?;

        tracing::debug!(
            model = %completion.model,
            finish_reason = ?completion.finish_reason,
            text = completion.turn.is_text(),
            "Model responded"
        );
        Ok(completion)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ModelToolSpec],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[allow(clippy::ref_option_ref, clippy::trivially_copy_pass_by_ref)]
fn no_tools(tools: &&[ModelToolSpec]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ChatFunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}
