//! # agent-core
//!
//! Provider-agnostic orchestration of tool-augmented conversations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                           │
//! │  ┌─────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ Round loop  │──│ ToolSession  │  │ LlmProvider          │  │
//! │  │ (bounded)   │──│ (MCP, local) │  │ (Strategy)           │  │
//! │  └─────────────┘  └──────────────┘  └──────────────────────┘  │
//! │         │                                                     │
//! │         ▼                                                     │
//! │  Transcript ──▶ TranscriptLogger (snapshot per mutation)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transcript is owned by the caller (one per conversation) and passed
//! into every round, so concurrent conversations never share context.

pub mod error;
pub mod logger;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod session;
pub mod tool;
pub mod transcript;

pub use error::{AgentError, Result};
pub use logger::{FileTranscriptLogger, TranscriptLogger};
pub use message::{Content, ContentPart, Message, Role, ToolCallRequest};
pub use orchestrator::{Connected, Orchestrator, OrchestratorBuilder, OrchestratorConfig};
pub use provider::{Completion, GenerationOptions, LlmProvider, ModelTurn};
pub use session::{Session, SessionId, SessionStore};
pub use tool::{ModelToolSpec, Tool, ToolDescriptor, ToolOutput, ToolRegistry, ToolSession};
pub use transcript::Transcript;
