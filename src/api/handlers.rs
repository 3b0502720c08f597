//! API request handlers.

use axum::{
    Json,
    extract::{Form, State},
    response::Html,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conversation::Message;
use crate::upstream::OutboundPayload;

use super::error::ApiResult;
use super::page;
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Render the chat page with the current conversation.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let conversation = state.conversation.lock().await;
    Html(page::render(&conversation.snapshot()))
}

/// Form body for `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: Option<String>,
}

/// Response body for `POST /chat`.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub conversation_history: Vec<Message>,
}

/// Relay one user message to the experiment API and return the accumulated
/// conversation.
///
/// An empty or missing message is substituted with the configured default
/// search term, but only when the conversation is still empty; otherwise the
/// history is sent as-is. The user message appended before the upstream call
/// stays in the store even if the call ultimately fails.
pub async fn chat(
    State(state): State<AppState>,
    Form(form): Form<ChatForm>,
) -> ApiResult<Json<ChatResponse>> {
    let user_message = form.message.unwrap_or_default().trim().to_string();
    debug!(message = %user_message, "user message received");

    let snapshot = {
        let mut conversation = state.conversation.lock().await;
        if !user_message.is_empty() {
            conversation.append_user(user_message);
        } else if conversation.is_empty() {
            debug!("no user message provided, using default search");
            conversation.append_user(state.chat.default_search.clone());
        }
        conversation.snapshot()
    };

    let payload = OutboundPayload::new(
        state.chat.search_key.clone(),
        state.chat.default_search.clone(),
        state.chat.search_mode.clone(),
        snapshot,
        state.chat.max_rows,
    );

    // The store lock is not held across the network call; a failed call
    // leaves the already-appended user message in place.
    let outcome = state.upstream.send(&payload, &state.tokens).await?;

    let mut conversation = state.conversation.lock().await;
    if let Some(history) = outcome.canonical_history {
        conversation.replace_history(history);
    }
    conversation.ensure_system_preamble(state.chat.instruction.as_deref());
    conversation.append_assistant_if_new(&outcome.reply);
    let conversation_history = conversation.snapshot();
    drop(conversation);

    info!(
        reply_len = outcome.reply.len(),
        history_len = conversation_history.len(),
        "chat exchange completed"
    );

    Ok(Json(ChatResponse {
        reply: outcome.reply,
        conversation_history,
    }))
}
