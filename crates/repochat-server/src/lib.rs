//! HTTP server for repochat.
//!
//! Serves both agent modes over REST and SSE: durable workflow runs with
//! follow-ups and reconnect, and stateless bash-tool turns.

pub mod error;
pub mod routes;
pub mod sse;
pub mod state;

pub use error::{ApiError, ApiFailure};
pub use routes::{create_router, CONVERSATION_ID_HEADER, RUN_ID_HEADER, SANDBOX_ID_HEADER};
pub use state::AppState;
