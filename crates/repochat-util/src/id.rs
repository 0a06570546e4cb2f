//! ULID-based identifier generation with prefixes.
//!
//! Server-generated identifiers follow the pattern `prefix_ulid`, for example
//! `run_01hqxyz...` for conversation runs. Conversation tokens are generated
//! client-side and use the shorter `conv-xxxxxxx` form.

use rand::distributions::Alphanumeric;
use rand::Rng;
use ulid::Ulid;

/// Length of the random suffix in a conversation token.
const CONVERSATION_SUFFIX_LEN: usize = 7;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Run,
    Message,
    ToolCall,
    Sandbox,
}

impl IdPrefix {
    /// Get the string prefix for this identifier type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Run => "run",
            IdPrefix::Message => "msg",
            IdPrefix::ToolCall => "call",
            IdPrefix::Sandbox => "sbx",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "run" => Some(IdPrefix::Run),
            "msg" => Some(IdPrefix::Message),
            "call" => Some(IdPrefix::ToolCall),
            "sbx" => Some(IdPrefix::Sandbox),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    pub fn ascending(prefix: IdPrefix) -> String {
        Self::with_ulid(prefix, Ulid::new())
    }

    /// Generate an identifier with a specific ULID (for testing or imports).
    pub fn with_ulid(prefix: IdPrefix, ulid: Ulid) -> String {
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Parse an identifier into its prefix and ULID parts.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let (prefix, ulid) = id.split_once('_')?;
        let prefix = IdPrefix::parse(prefix)?;
        let ulid = Ulid::from_string(ulid).ok()?;
        Some((prefix, ulid))
    }

    /// Check if an identifier has the expected prefix.
    pub fn has_prefix(id: &str, prefix: IdPrefix) -> bool {
        id.starts_with(prefix.as_str()) && id.chars().nth(prefix.as_str().len()) == Some('_')
    }

    /// Generate a run ID.
    pub fn run() -> String {
        Self::ascending(IdPrefix::Run)
    }

    /// Generate a message ID.
    pub fn message() -> String {
        Self::ascending(IdPrefix::Message)
    }

    /// Generate a tool call ID.
    pub fn tool_call() -> String {
        Self::ascending(IdPrefix::ToolCall)
    }

    /// Generate a sandbox ID.
    pub fn sandbox() -> String {
        Self::ascending(IdPrefix::Sandbox)
    }

    /// Generate a client-side conversation token (`conv-` plus 7 lowercase
    /// alphanumerics).
    pub fn conversation() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CONVERSATION_SUFFIX_LEN)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();
        format!("conv-{suffix}")
    }
}
