//! Pattern search tool (grep).

use crate::{parse_args, shell::quote, Tool, ToolContext, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub struct SearchFilesTool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchFilesArgs {
    pattern: String,
    #[serde(default = "default_path")]
    path: String,
    #[serde(default, alias = "file_pattern")]
    file_pattern: Option<String>,
}

fn default_path() -> String {
    ".".to_string()
}

fn search_command(pattern: &str, path: &str, file_pattern: Option<&str>) -> String {
    let filter = file_pattern
        .map(|fp| format!("--include={} ", quote(fp)))
        .unwrap_or_default();
    // No matches is not a failure.
    format!("grep -r {filter}{} {} || true", quote(pattern), quote(path))
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn id(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for patterns in files using grep"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Search pattern"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search",
                    "default": "."
                },
                "filePattern": {
                    "type": "string",
                    "description": "File filter (e.g., '*.js')"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: SearchFilesArgs = parse_args(args)?;
        let result = ctx
            .run(&search_command(
                &args.pattern,
                &args.path,
                args.file_pattern.as_deref(),
            ))
            .await?;

        let match_count = result
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        debug!(pattern = %args.pattern, match_count, "Searched files");

        Ok(ToolOutput::new(
            format!("grep {}", args.pattern),
            json!({
                "success": result.success,
                "matches": result.stdout,
                "matchCount": match_count,
                "pattern": args.pattern,
            }),
        ))
    }
}
