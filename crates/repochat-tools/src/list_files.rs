//! Directory listing tool.

use crate::{parse_args, shell::quote, Tool, ToolContext, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub struct ListFilesTool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
    #[serde(default, alias = "max_depth")]
    max_depth: Option<u32>,
}

fn list_command(path: &str, recursive: bool, max_depth: Option<u32>) -> String {
    let path = quote(path);
    if !recursive {
        return format!("ls -la {path}");
    }
    match max_depth {
        Some(depth) => format!("find {path} -maxdepth {depth} -type f -o -type d"),
        None => format!("find {path} -type f -o -type d"),
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn id(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories in a given path in the sandbox."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path to list (defaults to current dir)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "List files recursively"
                },
                "maxDepth": {
                    "type": "number",
                    "description": "Max depth for recursive listing"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: ListFilesArgs = parse_args(args)?;
        let path = args
            .path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| ".".to_string());

        let result = ctx
            .run(&list_command(&path, args.recursive, args.max_depth))
            .await?;
        let file_count = result
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        debug!(path = %path, file_count, "Listed directory");

        let mut record = json!({
            "path": path,
            "files": result.stdout,
            "fileCount": file_count,
            "truncated": false,
        });
        if !result.success {
            record["error"] = Value::String(result.combined());
        }

        Ok(ToolOutput::new(format!("ls {path}"), record))
    }
}
