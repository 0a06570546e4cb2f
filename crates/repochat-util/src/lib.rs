//! Shared utilities for repochat.
//!
//! This crate provides common utilities used across the repochat workspace:
//! - ULID-based identifier generation
//! - Logging setup with tracing
//! - Platform directories

pub mod id;
pub mod log;
pub mod path;

pub use id::{IdPrefix, Identifier};
