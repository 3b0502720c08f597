//! Client for the upstream experiment/chat API.

mod client;
mod error;
mod types;

pub use client::{ChatClient, ChatOutcome, NO_CONTENT_REPLY, NO_MESSAGES_REPLY};
pub use error::{UpstreamError, UpstreamResult};
pub use types::{DataSearchOptions, OutboundPayload, UpstreamConfig};
