//! Authenticated call-with-retry loop against the experiment endpoint.

use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use thiserror::Error;
use tracing::{debug, warn};

use crate::conversation::IncomingMessage;
use crate::identity::TokenCache;

use super::error::{UpstreamError, UpstreamResult};
use super::types::{ExperimentResponse, OutboundPayload, UpstreamConfig};

/// Reply used when the last upstream message has no content field.
pub const NO_CONTENT_REPLY: &str = "No content in reply.";

/// Reply used when the upstream history carries no messages.
pub const NO_MESSAGES_REPLY: &str = "No messages in API response.";

/// Outcome of a successful chat call.
#[derive(Debug)]
pub struct ChatOutcome {
    /// The assistant's reply text.
    pub reply: String,
    /// Full canonical history from the upstream, when it returned one.
    /// `None` leaves local state untouched.
    pub canonical_history: Option<Vec<IncomingMessage>>,
}

/// Per-attempt failure, absorbed by the retry loop.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unparseable response body: {0}")]
    Parse(String),
}

/// Client for the upstream experiment/chat API.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    config: UpstreamConfig,
}

impl ChatClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/experiment/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.experiment_id
        )
    }

    /// Send the payload, retrying transient failures with a fixed delay.
    ///
    /// Tokens come from the shared cache; a 401/403 invalidates it so the
    /// next attempt runs with a fresh token. Token acquisition failures are
    /// not retried. With `max_attempts = 0` the loop blocks until the
    /// upstream recovers.
    pub async fn send(
        &self,
        payload: &OutboundPayload,
        tokens: &TokenCache,
    ) -> UpstreamResult<ChatOutcome> {
        let endpoint = self.endpoint();
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempts: u32 = 0;

        loop {
            // Saturate so unlimited-retry mode cannot overflow the counter.
            attempts = attempts.saturating_add(1);
            let token = tokens.get_or_refresh().await?;

            match self.attempt(&endpoint, payload, &token).await {
                Ok(outcome) => {
                    debug!(attempts, "upstream call succeeded");
                    return Ok(outcome);
                }
                Err(err) => {
                    if let AttemptError::Status { status, .. } = &err {
                        if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN {
                            tokens.invalidate().await;
                        }
                    }
                    warn!(attempt = attempts, error = %err, "upstream call failed");

                    if self.config.max_attempts != 0 && attempts >= self.config.max_attempts {
                        return Err(UpstreamError::RetriesExhausted {
                            attempts,
                            last_error: err.to_string(),
                        });
                    }
                    debug!("retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        endpoint: &str,
        payload: &OutboundPayload,
        token: &str,
    ) -> Result<ChatOutcome, AttemptError> {
        let response = self
            .client
            .post(endpoint)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::ACCEPT, "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Status { status, body });
        }

        let body: ExperimentResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Parse(e.to_string()))?;
        Ok(extract_outcome(body))
    }
}

/// Read the reply out of a parsed response.
///
/// A non-empty message list yields the last message's content and becomes
/// the canonical history; an empty or absent list yields a placeholder and
/// leaves history alone.
fn extract_outcome(body: ExperimentResponse) -> ChatOutcome {
    match body.chat_history {
        Some(history) if !history.messages.is_empty() => {
            let reply = history
                .messages
                .last()
                .and_then(|m| m.content.clone())
                .unwrap_or_else(|| NO_CONTENT_REPLY.to_string());
            ChatOutcome {
                reply,
                canonical_history: Some(history.messages),
            }
        }
        _ => ChatOutcome {
            reply: NO_MESSAGES_REPLY.to_string(),
            canonical_history: None,
        },
    }
}
