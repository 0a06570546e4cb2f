//! Command handlers for the repochat CLI.

pub mod chat;
pub mod config;
pub mod logging;
pub mod serve;

pub use chat::*;
pub use config::*;
pub use logging::*;
pub use serve::*;
