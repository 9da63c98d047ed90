//! Orchestration Loop
//!
//! Alternates model invocations and tool executions until the model produces
//! a final text answer:
//!
//! ```text
//! user message ─▶ AWAITING_MODEL ──text──▶ done (return round messages)
//!                     ▲   │
//!                     │   └─tool calls─▶ run each call in order ─┐
//!                     └──────────────────────────────────────────┘
//! ```
//!
//! Tool calls within one turn run sequentially in the order the model listed
//! them. The first failing call aborts the round; later calls are not run.
//! Every transcript mutation is followed by a best-effort snapshot.

use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::logger::TranscriptLogger;
use crate::message::{Message, ToolCallRequest};
use crate::provider::{GenerationOptions, LlmProvider, ModelTurn};
use crate::tool::{ModelToolSpec, ToolDescriptor, ToolOutput, ToolSession, adapt_catalog};
use crate::transcript::{ABORTED_TOOL_CALL_NOTICE, Transcript};

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// System prompt for new transcripts
    pub system_prompt: String,

    /// Model invocations allowed per round before giving up
    pub max_rounds: usize,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            generation: GenerationOptions::default(),
        }
    }
}

pub const DEFAULT_MAX_ROUNDS: usize = 10;

pub const DEFAULT_SYSTEM_PROMPT: &str = r"You are an AI assistant that answers by using the provided tools.
Do not attempt to answer questions outside the scope of the tools.
If a request cannot be handled with the available tools, say so briefly.";

/// Outcome of a successful connect
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connected {
    pub endpoint: String,
    /// Tool names exposed to the model
    pub tools: Vec<String>,
}

/// Drives conversations against one tool session
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    session: Box<dyn ToolSession>,
    logger: Option<Arc<dyn TranscriptLogger>>,
    config: OrchestratorConfig,
    tool_specs: Option<Vec<ModelToolSpec>>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        session: Box<dyn ToolSession>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            session,
            logger: None,
            config,
            tool_specs: None,
        }
    }

    /// Attach a transcript logger
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn TranscriptLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Connect the tool session and cache the adapted tool catalog.
    ///
    /// On failure the session is cleaned up so no half-open state survives.
    pub async fn connect(&mut self, endpoint: &str) -> Result<Connected> {
        if self.is_connected() {
            self.cleanup().await?;
        }

        let descriptors = match self.connect_and_list(endpoint).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                tracing::error!(endpoint, error = %e, "Failed to connect to tool provider");
                if let Err(cleanup_err) = self.session.cleanup().await {
                    tracing::warn!(error = %cleanup_err, "Cleanup after failed connect also failed");
                }
                return Err(match e {
                    AgentError::ConnectionFailed(_) => e,
                    other => AgentError::ConnectionFailed(other.to_string()),
                });
            }
        };

        let specs = adapt_catalog(&descriptors);
        let tools: Vec<String> = specs.iter().map(|s| s.name().to_string()).collect();
        tracing::info!(endpoint, ?tools, "Connected to tool provider");

        self.tool_specs = Some(specs);
        Ok(Connected {
            endpoint: endpoint.to_string(),
            tools,
        })
    }

    async fn connect_and_list(&mut self, endpoint: &str) -> Result<Vec<ToolDescriptor>> {
        self.session.connect(endpoint).await?;
        self.session.list_tools().await
    }

    /// Release the tool session. Safe to call repeatedly or without connect.
    pub async fn cleanup(&mut self) -> Result<()> {
        self.tool_specs = None;
        self.session.cleanup().await?;
        tracing::info!("Tool session closed");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.tool_specs.is_some() && self.session.is_connected()
    }

    /// Tool specs shown to the model, once connected
    pub fn tools(&self) -> Option<&[ModelToolSpec]> {
        self.tool_specs.as_deref()
    }

    /// Fresh transcript seeded with the configured system prompt
    pub fn new_transcript(&self) -> Transcript {
        Transcript::new(self.config.system_prompt.clone())
    }

    /// Get configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one round for a user utterance.
    ///
    /// Returns every message the round appended, user message first. On error
    /// the transcript keeps what was appended before the failure.
    pub async fn process_message(
        &self,
        transcript: &mut Transcript,
        text: &str,
    ) -> Result<Vec<Message>> {
        let specs = self.tool_specs.as_deref().ok_or(AgentError::NotConnected)?;
        if !self.session.is_connected() {
            return Err(AgentError::NotConnected);
        }

        let closed = transcript.close_dangling_tool_calls(ABORTED_TOOL_CALL_NOTICE);
        if closed > 0 {
            tracing::warn!(closed, "Closed tool calls left open by a failed round");
            self.snapshot(transcript).await;
        }

        tracing::info!(chars = text.len(), "Processing chat message");
        let start = transcript.len();
        self.append(transcript, Message::user(text)).await?;

        match self.run_rounds(transcript, specs).await {
            Ok(()) => Ok(transcript.messages()[start..].to_vec()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to process chat message");
                Err(e)
            }
        }
    }

    async fn run_rounds(&self, transcript: &mut Transcript, specs: &[ModelToolSpec]) -> Result<()> {
        for round in 1..=self.config.max_rounds {
            tracing::debug!(
                round,
                messages = transcript.len(),
                tokens = transcript.estimate_tokens(),
                "Calling model"
            );

            let completion = self
                .provider
                .invoke(transcript.messages(), specs, &self.config.generation)
                .await
                .map_err(|e| match e {
                    AgentError::ModelInvocationFailed(_) => e,
                    other => AgentError::ModelInvocationFailed(other.to_string()),
                })?;

            match completion.turn {
                ModelTurn::Text { content } => {
                    self.append(transcript, Message::assistant(content)).await?;
                    return Ok(());
                }
                ModelTurn::ToolCalls { calls, content } => {
                    tracing::info!(round, calls = calls.len(), "Model requested tools");
                    check_call_ids(&calls)?;
                    self.append(
                        transcript,
                        Message::assistant_with_tool_calls(content, calls.clone()),
                    )
                    .await?;

                    for call in &calls {
                        let output = self.execute(call).await?;
                        self.append(transcript, Message::tool_result(call.id.clone(), output))
                            .await?;
                    }
                }
            }
        }

        Err(AgentError::TurnLimitExceeded(self.config.max_rounds))
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<ToolOutput> {
        let arguments = call.parse_arguments()?;
        tracing::info!(tool = %call.name, id = %call.id, "Executing tool");
        tracing::debug!(tool = %call.name, %arguments, "Tool arguments");

        let output = self
            .session
            .call_tool(&call.name, arguments)
            .await
            .map_err(|e| match e {
                AgentError::ToolExecutionFailed { .. } | AgentError::NotConnected => e,
                other => AgentError::tool_failed(&call.name, other.to_string()),
            })?;

        if output.is_error {
            return Err(AgentError::tool_failed(&call.name, output.to_text()));
        }

        tracing::debug!(tool = %call.name, result = %output.to_text(), "Tool result");
        Ok(output)
    }

    async fn append(&self, transcript: &mut Transcript, message: Message) -> Result<()> {
        transcript.push(message)?;
        self.snapshot(transcript).await;
        Ok(())
    }

    async fn snapshot(&self, transcript: &Transcript) {
        if let Some(logger) = &self.logger {
            if let Err(e) = logger.persist(transcript.messages()).await {
                tracing::warn!(error = %e, "Failed to persist transcript snapshot");
            }
        }
    }
}

/// Every call of a turn needs its own non-empty id, or results cannot be paired
fn check_call_ids(calls: &[ToolCallRequest]) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(calls.len());
    for call in calls {
        if call.id.trim().is_empty() {
            return Err(AgentError::ModelInvocationFailed(format!(
                "tool call '{}' has no id",
                call.name
            )));
        }
        if !seen.insert(call.id.as_str()) {
            return Err(AgentError::ModelInvocationFailed(format!(
                "tool call id '{}' is used more than once",
                call.id
            )));
        }
    }
    Ok(())
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    session: Option<Box<dyn ToolSession>>,
    logger: Option<Arc<dyn TranscriptLogger>>,
    config: OrchestratorConfig,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            session: None,
            logger: None,
            config: OrchestratorConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn session(mut self, session: Box<dyn ToolSession>) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn TranscriptLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = Some(temp);
        self
    }

    #[must_use]
    pub const fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = max;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let session = self
            .session
            .ok_or_else(|| AgentError::Config("Tool session is required".into()))?;
        if self.config.max_rounds == 0 {
            return Err(AgentError::Config("max_rounds must be at least 1".into()));
        }

        let orchestrator = Orchestrator::new(provider, session, self.config);
        Ok(match self.logger {
            Some(logger) => orchestrator.with_logger(logger),
            None => orchestrator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::provider::Completion;
    use crate::tool::{Tool, ToolDescriptor, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned turns and records the context size of every request
    #[derive(Default)]
    struct ScriptedProvider {
        turns: Mutex<VecDeque<Result<ModelTurn>>>,
        requests: Mutex<Vec<Vec<Message>>>,
        repeat_last: Option<ModelTurn>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Result<ModelTurn>>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                ..Default::default()
            }
        }

        fn forever(turn: ModelTurn) -> Self {
            Self {
                repeat_last: Some(turn),
                ..Default::default()
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn invoke(
            &self,
            messages: &[Message],
            _tools: &[ModelToolSpec],
            options: &GenerationOptions,
        ) -> Result<Completion> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let next = self.turns.lock().unwrap().pop_front();
            let turn = match (next, &self.repeat_last) {
                (Some(turn), _) => turn?,
                (None, Some(turn)) => turn.clone(),
                (None, None) => ModelTurn::Text { content: "done".into() },
            };
            Ok(Completion {
                turn,
                model: options.model.clone(),
                usage: None,
                finish_reason: None,
            })
        }
    }

    struct CountingTool {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        reply: std::result::Result<ToolOutput, String>,
    }

    impl CountingTool {
        fn ok(name: &'static str, reply: Value) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let tool = Self {
                name,
                calls: calls.clone(),
                reply: Ok(ToolOutput::text(reply.to_string())),
            };
            (tool, calls)
        }

        fn failing(name: &'static str) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let tool = Self {
                name,
                calls: calls.clone(),
                reply: Err("provider exploded".into()),
            };
            (tool, calls)
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new(self.name, None, json!({"type": "object"}))
        }

        async fn execute(&self, _arguments: Value) -> Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .map_err(|msg| AgentError::tool_failed(self.name, msg))
        }
    }

    /// Keeps every snapshot in memory
    #[derive(Default)]
    struct RecordingLogger {
        snapshots: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl TranscriptLogger for RecordingLogger {
        async fn persist(&self, messages: &[Message]) -> Result<()> {
            self.snapshots.lock().unwrap().push(messages.to_vec());
            Ok(())
        }
    }

    struct BrokenLogger;

    #[async_trait]
    impl TranscriptLogger for BrokenLogger {
        async fn persist(&self, _messages: &[Message]) -> Result<()> {
            Err(AgentError::Io(std::io::Error::other("disk full")))
        }
    }

    fn calls(specs: &[(&str, &str)]) -> ModelTurn {
        ModelTurn::ToolCalls {
            calls: specs
                .iter()
                .map(|(id, name)| ToolCallRequest::new(*id, *name, "{}"))
                .collect(),
            content: None,
        }
    }

    fn text(content: &str) -> ModelTurn {
        ModelTurn::Text { content: content.into() }
    }

    async fn connected(provider: Arc<ScriptedProvider>, registry: ToolRegistry) -> Orchestrator {
        let mut orchestrator = OrchestratorBuilder::new()
            .provider(provider)
            .session(Box::new(registry))
            .max_rounds(4)
            .build()
            .unwrap();
        orchestrator.connect("local").await.unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn test_text_turn_returns_user_and_assistant() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text("4"))]));
        let orchestrator = connected(provider.clone(), ToolRegistry::new()).await;
        let mut transcript = orchestrator.new_transcript();

        let messages = orchestrator
            .process_message(&mut transcript, "What is 2+2?")
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text(), "What is 2+2?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text(), "4");
        assert_eq!(transcript.len(), 3);
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_single_tool_call_round() {
        let (book, book_calls) = CountingTool::ok("book_room", json!({"status": "ok"}));
        let mut registry = ToolRegistry::new();
        registry.register(book);

        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(ModelTurn::ToolCalls {
                calls: vec![ToolCallRequest::new(
                    "c1",
                    "book_room",
                    r#"{"room":"A","time":"15:00"}"#,
                )],
                content: None,
            }),
            Ok(text("Booked.")),
        ]));
        let orchestrator = connected(provider.clone(), registry).await;
        let mut transcript = orchestrator.new_transcript();

        let messages = orchestrator
            .process_message(&mut transcript, "Book room A at 3pm")
            .await
            .unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].tool_calls[0].id, "c1");
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[2].text(), r#"{"status":"ok"}"#);
        assert_eq!(messages[3].text(), "Booked.");
        assert_eq!(book_calls.load(Ordering::SeqCst), 1);

        // Second request saw the tool result
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[1].last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn test_tool_results_follow_request_order() {
        let mut registry = ToolRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(CountingTool::ok(name, json!(name)).0);
        }
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(calls(&[("id-c", "c"), ("id-a", "a"), ("id-b", "b")])),
            Ok(text("done")),
        ]));
        let orchestrator = connected(provider, registry).await;
        let mut transcript = orchestrator.new_transcript();

        let messages = orchestrator.process_message(&mut transcript, "go").await.unwrap();

        let results: Vec<_> = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.clone().unwrap(), m.text()))
            .collect();
        assert_eq!(
            results,
            vec![
                ("id-c".to_string(), r#""c""#.to_string()),
                ("id-a".to_string(), r#""a""#.to_string()),
                ("id-b".to_string(), r#""b""#.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_tool_aborts_round() {
        let (first, first_calls) = CountingTool::ok("first", json!("ok"));
        let (broken, broken_calls) = CountingTool::failing("broken");
        let (third, third_calls) = CountingTool::ok("third", json!("ok"));
        let mut registry = ToolRegistry::new();
        registry.register(first);
        registry.register(broken);
        registry.register(third);

        let provider = Arc::new(ScriptedProvider::new(vec![Ok(calls(&[
            ("c1", "first"),
            ("c2", "broken"),
            ("c3", "third"),
        ]))]));
        let logger = Arc::new(RecordingLogger::default());
        let mut orchestrator = OrchestratorBuilder::new()
            .provider(provider.clone())
            .session(Box::new(registry))
            .logger(logger.clone())
            .build()
            .unwrap();
        orchestrator.connect("local").await.unwrap();
        let mut transcript = orchestrator.new_transcript();

        let err = orchestrator
            .process_message(&mut transcript, "do three things")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::ToolExecutionFailed { ref name, .. } if name == "broken"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(broken_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.request_count(), 1);

        // system, user, assistant(tool_calls), one tool result
        let tool_results = transcript.messages().iter().filter(|m| m.role == Role::Tool).count();
        assert_eq!(tool_results, 1);
        assert_eq!(transcript.len(), 4);

        let snapshots = logger.snapshots.lock().unwrap();
        let last = snapshots.last().unwrap();
        assert_eq!(last.len(), 4);
        assert!(last[2].has_tool_calls());
    }

    #[tokio::test]
    async fn test_provider_side_error_flag_fails_round() {
        struct Flagged;

        #[async_trait]
        impl Tool for Flagged {
            fn descriptor(&self) -> ToolDescriptor {
                ToolDescriptor::new("book_room", Some("Books a room"), json!({}))
            }

            async fn execute(&self, _arguments: Value) -> Result<ToolOutput> {
                Ok(ToolOutput::error("room already taken"))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Flagged);
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(calls(&[("c1", "book_room")]))]));
        let orchestrator = connected(provider, registry).await;
        let mut transcript = orchestrator.new_transcript();

        let err = orchestrator
            .process_message(&mut transcript, "Book room A at 3pm")
            .await
            .unwrap_err();

        match err {
            AgentError::ToolExecutionFailed { name, message } => {
                assert_eq!(name, "book_room");
                assert_eq!(message, "room already taken");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.pending_tool_calls(), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_invalid_arguments_fail_without_calling_tool() {
        let (tool, tool_calls) = CountingTool::ok("book_room", json!("ok"));
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ModelTurn::ToolCalls {
            calls: vec![ToolCallRequest::new("c1", "book_room", "{oops")],
            content: None,
        })]));
        let orchestrator = connected(provider, registry).await;
        let mut transcript = orchestrator.new_transcript();

        let err = orchestrator.process_message(&mut transcript, "x").await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed { .. }));
        assert_eq!(tool_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let (tool, tool_calls) = CountingTool::ok("loop", json!("again"));
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        let provider = Arc::new(ScriptedProvider::forever(calls(&[("c", "loop")])));

        let mut orchestrator = OrchestratorBuilder::new()
            .provider(provider.clone())
            .session(Box::new(registry))
            .max_rounds(3)
            .build()
            .unwrap();
        orchestrator.connect("local").await.unwrap();
        let mut transcript = orchestrator.new_transcript();

        let err = orchestrator.process_message(&mut transcript, "spin").await.unwrap_err();
        assert!(matches!(err, AgentError::TurnLimitExceeded(3)));
        assert_eq!(provider.request_count(), 3);
        assert_eq!(tool_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text("hi"))]));
        let orchestrator = OrchestratorBuilder::new()
            .provider(provider.clone())
            .session(Box::new(ToolRegistry::new()))
            .build()
            .unwrap();
        let mut transcript = orchestrator.new_transcript();

        let err = orchestrator.process_message(&mut transcript, "hello").await.unwrap_err();
        assert!(matches!(err, AgentError::NotConnected));
        assert_eq!(transcript.len(), 1);
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent_and_disconnects() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut orchestrator = OrchestratorBuilder::new()
            .provider(provider)
            .session(Box::new(ToolRegistry::new()))
            .build()
            .unwrap();

        orchestrator.cleanup().await.unwrap();
        orchestrator.connect("local").await.unwrap();
        assert!(orchestrator.is_connected());

        orchestrator.cleanup().await.unwrap();
        orchestrator.cleanup().await.unwrap();
        assert!(!orchestrator.is_connected());

        let mut transcript = orchestrator.new_transcript();
        assert!(matches!(
            orchestrator.process_message(&mut transcript, "x").await,
            Err(AgentError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_session() {
        #[derive(Default)]
        struct RefusingSession {
            cleanups: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl ToolSession for RefusingSession {
            async fn connect(&mut self, endpoint: &str) -> Result<()> {
                Err(AgentError::ConnectionFailed(format!("{endpoint}: refused")))
            }

            async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
                Err(AgentError::NotConnected)
            }

            async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<ToolOutput> {
                Err(AgentError::NotConnected)
            }

            async fn cleanup(&mut self) -> Result<()> {
                self.cleanups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            fn is_connected(&self) -> bool {
                false
            }
        }

        let session = RefusingSession::default();
        let cleanups = session.cleanups.clone();
        let mut orchestrator = OrchestratorBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .session(Box::new(session))
            .build()
            .unwrap();

        let err = orchestrator.connect("http://nowhere/sse").await.unwrap_err();
        assert!(matches!(err, AgentError::ConnectionFailed(_)));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(!orchestrator.is_connected());
        assert!(orchestrator.tools().is_none());
    }

    #[tokio::test]
    async fn test_model_failure_aborts_round() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(AgentError::Other(
            "socket closed".into(),
        ))]));
        let orchestrator = connected(provider, ToolRegistry::new()).await;
        let mut transcript = orchestrator.new_transcript();

        let err = orchestrator.process_message(&mut transcript, "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::ModelInvocationFailed(ref m) if m.contains("socket closed")));
        assert_eq!(transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_logger_failure_is_not_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text("fine"))]));
        let mut orchestrator = OrchestratorBuilder::new()
            .provider(provider)
            .session(Box::new(ToolRegistry::new()))
            .logger(Arc::new(BrokenLogger))
            .build()
            .unwrap();
        orchestrator.connect("local").await.unwrap();
        let mut transcript = orchestrator.new_transcript();

        let messages = orchestrator.process_message(&mut transcript, "hi").await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_after_every_mutation() {
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool::ok("ping", json!("pong")).0);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(calls(&[("c1", "ping")])),
            Ok(text("pong received")),
        ]));
        let logger = Arc::new(RecordingLogger::default());
        let mut orchestrator = OrchestratorBuilder::new()
            .provider(provider)
            .session(Box::new(registry))
            .logger(logger.clone())
            .build()
            .unwrap();
        orchestrator.connect("local").await.unwrap();
        let mut transcript = orchestrator.new_transcript();

        orchestrator.process_message(&mut transcript, "ping").await.unwrap();

        // user, assistant(tool_calls), tool, assistant
        let sizes: Vec<_> = logger.snapshots.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_leading_content_kept_with_tool_calls() {
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool::ok("ping", json!("pong")).0);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(ModelTurn::ToolCalls {
                calls: vec![ToolCallRequest::new("c1", "ping", "{}")],
                content: Some("Let me check.".into()),
            }),
            Ok(text("Done.")),
        ]));
        let orchestrator = connected(provider, registry).await;
        let mut transcript = orchestrator.new_transcript();

        let messages = orchestrator.process_message(&mut transcript, "check").await.unwrap();
        assert_eq!(messages[1].text(), "Let me check.");
        assert!(messages[1].has_tool_calls());
    }

    #[tokio::test]
    async fn test_failed_round_is_closed_before_next_round() {
        let (broken, _) = CountingTool::failing("broken");
        let mut registry = ToolRegistry::new();
        registry.register(broken);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(calls(&[("c1", "broken")])),
            Ok(text("Sorry about that.")),
        ]));
        let orchestrator = connected(provider.clone(), registry).await;
        let mut transcript = orchestrator.new_transcript();

        assert!(orchestrator.process_message(&mut transcript, "first").await.is_err());
        let messages = orchestrator.process_message(&mut transcript, "second").await.unwrap();

        assert_eq!(messages.len(), 2);
        let requests = provider.requests.lock().unwrap();
        let context = &requests[1];
        assert_eq!(context[3].role, Role::Tool);
        assert_eq!(context[3].text(), ABORTED_TOOL_CALL_NOTICE);
        assert_eq!(context[4].text(), "second");
    }

    #[tokio::test]
    async fn test_transcripts_do_not_share_context() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text("a")), Ok(text("b"))]));
        let orchestrator = connected(provider.clone(), ToolRegistry::new()).await;

        let mut alice = orchestrator.new_transcript();
        let mut bob = orchestrator.new_transcript();
        orchestrator.process_message(&mut alice, "from alice").await.unwrap();
        orchestrator.process_message(&mut bob, "from bob").await.unwrap();

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[1].len(), 2);
        assert!(requests[1].iter().all(|m| m.text() != "from alice"));
    }

    #[tokio::test]
    async fn test_reused_call_ids_run_nothing() {
        let (ping, ping_calls) = CountingTool::ok("ping", json!("pong"));
        let mut registry = ToolRegistry::new();
        registry.register(ping);
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(calls(&[
            ("call_0", "ping"),
            ("call_0", "ping"),
        ]))]));
        let logger = Arc::new(RecordingLogger::default());
        let mut orchestrator = OrchestratorBuilder::new()
            .provider(provider)
            .session(Box::new(registry))
            .logger(logger.clone())
            .build()
            .unwrap();
        orchestrator.connect("local").await.unwrap();
        let mut transcript = orchestrator.new_transcript();

        let err = orchestrator.process_message(&mut transcript, "ping twice").await.unwrap_err();

        assert!(matches!(err, AgentError::ModelInvocationFailed(ref m) if m.contains("call_0")));
        assert_eq!(ping_calls.load(Ordering::SeqCst), 0);
        // system, user: the bad turn never reached the transcript
        assert_eq!(transcript.len(), 2);
        assert!(transcript.pending_tool_calls().is_empty());
        assert_eq!(logger.snapshots.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_call_id_runs_nothing() {
        let (ping, ping_calls) = CountingTool::ok("ping", json!("pong"));
        let mut registry = ToolRegistry::new();
        registry.register(ping);
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(calls(&[("", "ping")]))]));
        let orchestrator = connected(provider, registry).await;
        let mut transcript = orchestrator.new_transcript();

        let err = orchestrator.process_message(&mut transcript, "ping").await.unwrap_err();

        assert!(matches!(err, AgentError::ModelInvocationFailed(_)));
        assert_eq!(ping_calls.load(Ordering::SeqCst), 0);
        assert_eq!(transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_closing_dangling_calls_is_snapshotted() {
        let (broken, _) = CountingTool::failing("broken");
        let mut registry = ToolRegistry::new();
        registry.register(broken);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(calls(&[("c1", "broken")])),
            Ok(text("Sorry about that.")),
        ]));
        let logger = Arc::new(RecordingLogger::default());
        let mut orchestrator = OrchestratorBuilder::new()
            .provider(provider)
            .session(Box::new(registry))
            .logger(logger.clone())
            .build()
            .unwrap();
        orchestrator.connect("local").await.unwrap();
        let mut transcript = orchestrator.new_transcript();

        assert!(orchestrator.process_message(&mut transcript, "first").await.is_err());
        orchestrator.process_message(&mut transcript, "second").await.unwrap();

        // user, assistant(tool_calls) | closing notice, user, assistant
        let snapshots = logger.snapshots.lock().unwrap();
        let sizes: Vec<_> = snapshots.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 3, 4, 5, 6]);
        assert_eq!(snapshots[2][3].text(), ABORTED_TOOL_CALL_NOTICE);
    }

    #[test]
    fn test_builder_requires_parts() {
        assert!(matches!(
            OrchestratorBuilder::new().build(),
            Err(AgentError::Config(_))
        ));
        let zero = OrchestratorBuilder::new()
            .provider(Arc::new(ScriptedProvider::default()))
            .session(Box::new(ToolRegistry::new()))
            .max_rounds(0)
            .build();
        assert!(matches!(zero, Err(AgentError::Config(_))));
    }
}
