//! Application state shared across handlers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::conversation::ConversationStore;
use crate::identity::TokenCache;
use crate::upstream::ChatClient;

/// Chat behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Custom system instruction injected after the first exchange.
    pub instruction: Option<String>,
    /// Key the upstream searches case data by.
    pub search_key: String,
    /// Upstream search mode.
    pub search_mode: String,
    /// Search term sent with every payload, and the message substituted
    /// when an empty first message arrives.
    pub default_search: String,
    /// Row cap for upstream data retrieval.
    pub max_rows: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            instruction: None,
            search_key: "CaseNumber".to_string(),
            search_mode: "all".to_string(),
            default_search: "123".to_string(),
            max_rows: 5000,
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The single process-wide conversation.
    pub conversation: Arc<Mutex<ConversationStore>>,
    /// Bearer-token cache for upstream calls.
    pub tokens: Arc<TokenCache>,
    /// Upstream experiment API client.
    pub upstream: Arc<ChatClient>,
    /// Chat behavior configuration.
    pub chat: ChatSettings,
}

impl AppState {
    /// Create new application state with an empty conversation.
    pub fn new(tokens: TokenCache, upstream: ChatClient, chat: ChatSettings) -> Self {
        Self {
            conversation: Arc::new(Mutex::new(ConversationStore::new())),
            tokens: Arc::new(tokens),
            upstream: Arc::new(upstream),
            chat,
        }
    }
}
