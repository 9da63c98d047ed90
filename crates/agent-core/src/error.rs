//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Transport or handshake failure while connecting to the tool provider
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted before a successful connect (or after cleanup)
    #[error("Not connected to tool provider")]
    NotConnected,

    /// A tool call raised or returned an error; the round was aborted
    #[error("Tool execution failed: {name}: {message}")]
    ToolExecutionFailed { name: String, message: String },

    /// Transport or provider error calling the language model
    #[error("Model invocation failed: {0}")]
    ModelInvocationFailed(String),

    /// The model kept requesting tools past the configured round limit
    #[error("Turn limit exceeded: no final answer after {0} rounds")]
    TurnLimitExceeded(usize),

    /// A message would break the transcript's tool-call pairing
    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Shorthand for a failed tool call
    pub fn tool_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecutionFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for API envelopes
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::ToolExecutionFailed { .. } => "TOOL_EXECUTION_FAILED",
            Self::ModelInvocationFailed(_) => "MODEL_INVOCATION_FAILED",
            Self::TurnLimitExceeded(_) => "TURN_LIMIT_EXCEEDED",
            Self::InvalidTranscript(_) => "INVALID_TRANSCRIPT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) | Self::Json(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::ConnectionFailed(_) | Self::NotConnected => {
                "The tool service is currently unavailable. Please try again later.".into()
            }
            Self::ToolExecutionFailed { name, message } => {
                format!("The tool '{name}' failed: {message}")
            }
            Self::ModelInvocationFailed(_) => {
                "The AI service encountered an error. Please try again.".into()
            }
            Self::TurnLimitExceeded(_) => {
                "The request took too many steps to process. Please try a simpler query.".into()
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}
