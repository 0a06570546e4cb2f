//! File reading tool.

use crate::{parse_args, shell::quote, Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn id(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file from the sandbox filesystem."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: ReadFileArgs = parse_args(args)?;
        if args.path.trim().is_empty() {
            return Err(ToolError::validation("path cannot be empty"));
        }

        let result = ctx.run(&format!("cat {}", quote(&args.path))).await?;
        debug!(path = %args.path, bytes = result.stdout.len(), "Read file");

        let mut record = json!({
            "success": result.success,
            "path": args.path,
            "content": result.stdout,
        });
        if !result.success {
            record["error"] = Value::String(result.combined());
        }

        Ok(ToolOutput::new(args.path, record))
    }
}
