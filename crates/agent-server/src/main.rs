//! MCP chat agent HTTP Server
//!
//! Axum-based server that answers chat messages through an MCP tool server
//! and an OpenAI-compatible model.

mod config;
mod handlers;
mod repository;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{FileTranscriptLogger, LlmProvider, OrchestratorBuilder};
use agent_mcp::McpSession;
use agent_runtime::OpenAiProvider;

use crate::config::AppConfig;
use crate::handlers::{chat_handler, chat_list_handler, chat_messages_handler, health_check};
use crate::repository::MemoryConversationRepository;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    // Initialize LLM provider
    let provider = Arc::new(OpenAiProvider::from_env()?);
    let model = provider.config().model.clone();
    if provider.health_check().await.unwrap_or(false) {
        tracing::info!(%model, "Model provider reachable");
    } else {
        tracing::warn!(%model, "Model provider not reachable; chat requests will fail");
    }

    let mut builder = OrchestratorBuilder::new()
        .provider(provider)
        .session(Box::new(McpSession::new()))
        .logger(Arc::new(FileTranscriptLogger::new(config.conversation_log_dir.clone())))
        .model(model)
        .max_rounds(config.max_tool_rounds);
    if let Some(prompt) = &config.system_prompt {
        builder = builder.system_prompt(prompt.clone());
    }
    let mut orchestrator = builder.build()?;

    // No tools, no service
    let connected = orchestrator.connect(&config.mcp_server_url).await?;
    tracing::info!("Registered {} tools:", connected.tools.len());
    for name in &connected.tools {
        tracing::info!("  • {}", name);
    }

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(
        orchestrator,
        config,
        Arc::new(MemoryConversationRepository::new()),
    );
    let app = build_router(state.clone());
    let sweeper = tokio::spawn(sweep_idle_sessions(state.clone()));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server running on http://{}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                        - Health check");
    tracing::info!("  POST /api/chat                      - Send message");
    tracing::info!("  GET  /api/chat/list?user_id=        - List chats");
    tracing::info!("  GET  /api/chat/{{session_id}}/messages - Chat history");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    state.orchestrator.write().await.cleanup().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/list", get(chat_list_handler))
        .route("/api/chat/{session_id}/messages", get(chat_messages_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically drop conversations nobody has touched within the idle TTL
async fn sweep_idle_sessions(state: AppState) {
    let period = (state.config.session_idle_ttl / 4).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let evicted = state.sessions.evict_idle().await;
        if evicted > 0 {
            let remaining = state.sessions.len().await;
            tracing::info!(evicted, remaining, "Evicted idle sessions");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
