//! Client side of repochat.
//!
//! - [`SessionContext`]: conversation token, run id, sandbox id and agent mode
//! - [`ChatTransport`]: HTTP requests and SSE chunk streams, with reconnect
//! - [`reconstruct`]: rebuilds display turns from a run's chunk stream

pub mod error;
pub mod reconstruct;
pub mod session;
pub mod sse;
pub mod transport;

pub use error::{ClientError, ClientResult};
pub use reconstruct::{reconstruct, SplitStrategy, Transcript, Turn, TurnPart, TurnRole, TurnStatus};
pub use session::{SessionContext, SessionState};
pub use sse::IndexedChunk;
pub use transport::{
    ChatTransport, ChunkStream, FollowUpAck, Health, StartedStream, MAX_CONSECUTIVE_ERRORS,
};
