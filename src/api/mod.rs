//! HTTP API layer.

mod error;
mod handlers;
mod page;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::{AppState, ChatSettings};
