//! HTTP Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use agent_core::{AgentError, Message, Role, SessionId};

use crate::repository::{ChatSummary, ConversationRecord};
use crate::state::AppState;

/// Reply used when a round produced no assistant text
pub const FALLBACK_REPLY: &str = "Sorry, I could not provide that information.";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub tools_connected: bool,
    pub tool_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatListQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub chat_list: Vec<ChatSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessagesResponse {
    pub chat_message_list: Vec<ConversationRecord>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: &AgentError) -> ApiError {
    let status = match err {
        AgentError::NotConnected | AgentError::ConnectionFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::TurnLimitExceeded(_) => StatusCode::LOOP_DETECTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            code: err.code().into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let orchestrator = state.orchestrator.read().await;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        tools_connected: orchestrator.is_connected(),
        tool_count: orchestrator.tools().map_or(0, <[_]>::len),
    })
}

/// Run one chat round in the caller's session
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Message must not be empty".into(),
                code: "EMPTY_MESSAGE".into(),
            }),
        ));
    }

    let orchestrator = state.orchestrator.read().await;
    let (session_id, session) = state
        .sessions
        .get_or_create(
            payload.session_id.clone().map(SessionId::from_string),
            payload.user_id.as_deref(),
            &orchestrator.config().system_prompt,
        )
        .await;

    let text = state.config.contextualize(&payload.message);
    let result = {
        let mut session = session.lock().await;
        let result = orchestrator
            .process_message(&mut session.transcript, &text)
            .await;
        session.touch();
        result
    };
    drop(orchestrator);

    let messages = result.map_err(|e| {
        tracing::error!(session_id = %session_id, error = %e, "Chat round failed");
        api_error(&e)
    })?;

    let reply = final_reply(&messages);

    let record = ConversationRecord::new(
        session_id.as_str(),
        payload.user_id,
        payload.message,
        reply.clone(),
    );
    if let Err(e) = state.repository.save(record).await {
        tracing::error!(session_id = %session_id, error = %e, "Failed to store conversation");
    }

    Ok(Json(ChatResponse {
        message: reply,
        session_id: session_id.to_string(),
    }))
}

/// Last assistant text of a round
fn final_reply(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .map(Message::text)
        .find(|text| !text.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_REPLY.into())
}

/// Chats of one user, newest first
pub async fn chat_list_handler(
    State(state): State<AppState>,
    Query(query): Query<ChatListQuery>,
) -> Result<Json<ChatListResponse>, ApiError> {
    let chat_list = state
        .repository
        .list_chats(&query.user_id)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %query.user_id, error = %e, "Failed to load chat list");
            api_error(&e)
        })?;

    Ok(Json(ChatListResponse { chat_list }))
}

/// Stored exchanges of one chat, oldest first
pub async fn chat_messages_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatMessagesResponse>, ApiError> {
    let chat_message_list = state.repository.messages(&session_id).await.map_err(|e| {
        tracing::error!(%session_id, error = %e, "Failed to load chat messages");
        api_error(&e)
    })?;

    Ok(Json(ChatMessagesResponse { chat_message_list }))
}
