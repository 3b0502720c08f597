//! Wire types for the experiment API.
//!
//! Field names follow the upstream contract verbatim, including its mixed
//! casing.

use serde::{Deserialize, Serialize};

use crate::conversation::{IncomingMessage, Message};

/// Upstream endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the experiment API.
    pub api_url: String,
    /// Experiment identifier appended to the endpoint path.
    pub experiment_id: String,
    /// Per-attempt request timeout in seconds.
    pub timeout_secs: u64,
    /// Fixed delay between retry attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Maximum attempts before giving up. `0` retries forever.
    pub max_attempts: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            experiment_id: String::new(),
            timeout_secs: 30,
            retry_delay_ms: 5000,
            max_attempts: 10,
        }
    }
}

/// Request body for one experiment call. Built per request, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundPayload {
    #[serde(rename = "dataSearchKey")]
    pub data_search_key: String,
    #[serde(rename = "DataSearchOptions")]
    pub data_search_options: DataSearchOptions,
    #[serde(rename = "chatHistory")]
    pub chat_history: OutboundHistory,
    #[serde(rename = "MaxNumberOfRows")]
    pub max_number_of_rows: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataSearchOptions {
    #[serde(rename = "Search")]
    pub search: String,
    #[serde(rename = "SearchMode")]
    pub search_mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundHistory {
    pub messages: Vec<Message>,
}

impl OutboundPayload {
    pub fn new(
        search_key: impl Into<String>,
        search: impl Into<String>,
        search_mode: impl Into<String>,
        messages: Vec<Message>,
        max_rows: u32,
    ) -> Self {
        Self {
            data_search_key: search_key.into(),
            data_search_options: DataSearchOptions {
                search: search.into(),
                search_mode: search_mode.into(),
            },
            chat_history: OutboundHistory { messages },
            max_number_of_rows: max_rows,
        }
    }
}

/// Response body of a successful experiment call.
#[derive(Debug, Deserialize)]
pub(crate) struct ExperimentResponse {
    #[serde(rename = "chatHistory", default)]
    pub chat_history: Option<ResponseHistory>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseHistory {
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
}
