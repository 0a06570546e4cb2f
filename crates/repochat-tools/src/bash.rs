//! Bash tool - run an arbitrary shell command in the sandbox.

use crate::{parse_args, Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub struct BashTool;

#[derive(Debug, Deserialize)]
struct BashArgs {
    command: String,
}

#[async_trait]
impl Tool for BashTool {
    fn id(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        r#"Execute a bash command in the sandbox.

Usage notes:
- Commands run from the sandbox workspace directory.
- The working directory persists between calls; cd does not.
- Non-zero exit codes are reported in the result, not as errors."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: BashArgs = parse_args(args)?;
        if args.command.trim().is_empty() {
            return Err(ToolError::validation("Command cannot be empty"));
        }

        let result = ctx.run(&args.command).await?;
        debug!(command = %args.command, exit_code = result.exit_code, "Bash command finished");

        Ok(ToolOutput::new(
            args.command.clone(),
            json!({
                "success": result.success,
                "command": args.command,
                "stdout": result.stdout,
                "stderr": result.stderr,
                "exitCode": result.exit_code,
            }),
        ))
    }
}
