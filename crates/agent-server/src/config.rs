//! Server configuration from the environment

use std::path::PathBuf;
use std::time::Duration;

use agent_core::orchestrator::DEFAULT_MAX_ROUNDS;
use agent_core::session::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE_TTL};
use agent_core::{AgentError, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// SSE endpoint of the MCP tool server
    pub mcp_server_url: String,

    pub bind_addr: String,

    /// Model invocations allowed per chat request
    pub max_tool_rounds: usize,

    /// Where transcript snapshots are written
    pub conversation_log_dir: PathBuf,

    /// Overrides the built-in system prompt
    pub system_prompt: Option<String>,

    /// Prepended to every user message before it reaches the model
    pub context_prefix: Option<String>,

    /// Conversations idle this long are dropped from memory
    pub session_idle_ttl: Duration,

    /// Conversations kept in memory at once
    pub max_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mcp_server_url: "http://localhost:8080/sse".into(),
            bind_addr: "0.0.0.0:8001".into(),
            max_tool_rounds: DEFAULT_MAX_ROUNDS,
            conversation_log_dir: PathBuf::from("conversations"),
            system_prompt: None,
            context_prefix: None,
            session_idle_ttl: DEFAULT_SESSION_IDLE_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let max_tool_rounds =
            parse_positive("MAX_TOOL_ROUNDS", get("MAX_TOOL_ROUNDS"), defaults.max_tool_rounds)?;
        let max_sessions =
            parse_positive("MAX_SESSIONS", get("MAX_SESSIONS"), defaults.max_sessions)?;
        let idle_secs = parse_positive(
            "SESSION_IDLE_TTL_SECS",
            get("SESSION_IDLE_TTL_SECS"),
            defaults.session_idle_ttl.as_secs(),
        )?;

        Ok(Self {
            mcp_server_url: get("MCP_SERVER_URL").unwrap_or(defaults.mcp_server_url),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_tool_rounds,
            conversation_log_dir: get("CONVERSATION_LOG_DIR")
                .map_or(defaults.conversation_log_dir, PathBuf::from),
            system_prompt: get("SYSTEM_PROMPT"),
            context_prefix: get("CHAT_CONTEXT_PREFIX"),
            session_idle_ttl: Duration::from_secs(idle_secs),
            max_sessions,
        })
    }

    /// Message as the model should see it
    pub fn contextualize(&self, message: &str) -> String {
        match &self.context_prefix {
            Some(prefix) => format!("{prefix} {message}"),
            None => message.to_string(),
        }
    }
}

fn parse_positive<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(n) if n > T::from(0) => Ok(n),
        _ => Err(AgentError::Config(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))),
    }
}
