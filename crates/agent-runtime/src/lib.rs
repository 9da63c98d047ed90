//! # agent-runtime
//!
//! Model Invoker implementations for the orchestrator.
//!
//! ## Providers
//!
//! - **OpenAI** (default): chat-completions with native tool calling. Also
//!   covers OpenAI-compatible servers such as Ollama's `/v1` endpoint.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::openai::OpenAiProvider;
//!
//! let provider = OpenAiProvider::from_env()?;
//! let orchestrator = OrchestratorBuilder::new()
//!     .provider(Arc::new(provider))
//!     .session(Box::new(McpSession::new()))
//!     .build()?;
//! ```

pub mod openai;

pub use openai::{OpenAiConfig, OpenAiProvider};

// Re-export core types for convenience
pub use agent_core::{AgentError, GenerationOptions, LlmProvider, Message, ModelTurn, Result, Role};
