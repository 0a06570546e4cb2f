//! Tool registry.

use crate::{BoxedTool, ToolContext, ToolError, ToolOutput, ToolResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of available tools, ordered by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, BoxedTool>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The five repository tools used by durable conversations.
    pub fn workflow() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::git_clone::GitCloneTool));
        registry.register(Arc::new(crate::list_files::ListFilesTool));
        registry.register(Arc::new(crate::read_file::ReadFileTool));
        registry.register(Arc::new(crate::search_files::SearchFilesTool));
        registry.register(Arc::new(crate::bash::BashTool));
        registry
    }

    /// Just the shell tool, for stateless turns.
    pub fn bash_only() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::bash::BashTool));
        registry
    }

    /// Register a tool.
    pub fn register(&mut self, tool: BoxedTool) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    /// Get a tool by ID.
    pub fn get(&self, id: &str) -> Option<&BoxedTool> {
        self.tools.get(id)
    }

    /// List all tool IDs.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Get all tools.
    pub fn all(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.values()
    }

    /// Look up and run a tool.
    pub async fn execute(&self, id: &str, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let tool = self
            .get(id)
            .ok_or_else(|| ToolError::NotFound(id.to_string()))?;
        tool.execute(args, ctx).await
    }
}
