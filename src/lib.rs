//! Casechat library.
//!
//! Core components of the authenticated chat relay: the shared conversation
//! store, bearer-token acquisition and caching, the retrying upstream client,
//! and the HTTP API layer that composes them.

pub mod api;
pub mod conversation;
pub mod identity;
pub mod upstream;
