//! Git clone tool.
//!
//! Cloning is idempotent: an existing checkout directory short-circuits with
//! `alreadyCloned: true`, so a replayed call never clones twice.

use crate::{parse_args, shell::quote, Tool, ToolContext, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

pub struct GitCloneTool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitCloneArgs {
    #[serde(alias = "repo_url")]
    repo_url: String,
    #[serde(default)]
    destination: Option<String>,
}

/// Directory a clone lands in: the destination, else the URL's last path
/// segment without `.git`, else `repo`.
pub fn repo_name(repo_url: &str, destination: Option<&str>) -> String {
    if let Some(dest) = destination.filter(|d| !d.trim().is_empty()) {
        return dest.to_string();
    }
    repo_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|segment| segment.trim_end_matches(".git"))
        .filter(|segment| !segment.is_empty())
        .unwrap_or("repo")
        .to_string()
}

#[async_trait]
impl Tool for GitCloneTool {
    fn id(&self) -> &str {
        "git_clone"
    }

    fn description(&self) -> &str {
        "Clone a GitHub repository. Only needs to be done once per repo."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["repoUrl"],
            "properties": {
                "repoUrl": {
                    "type": "string",
                    "description": "GitHub repository URL"
                },
                "destination": {
                    "type": "string",
                    "description": "Directory name"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: GitCloneArgs = parse_args(args)?;
        let name = repo_name(&args.repo_url, args.destination.as_deref());
        let title = format!("git clone {}", args.repo_url);

        let check = ctx
            .run(&format!(
                "test -d {} && echo exists || echo not_exists",
                quote(&name)
            ))
            .await?;

        if check.stdout.trim() == "exists" {
            info!(repo = %name, "Repository already cloned, skipping");
            return Ok(ToolOutput::new(
                title,
                json!({
                    "success": true,
                    "output": format!("Repository '{name}' already exists. Skipped."),
                    "repoName": name,
                    "alreadyCloned": true,
                }),
            ));
        }

        debug!(url = %args.repo_url, repo = %name, "Cloning repository");
        let result = ctx
            .run(&format!("git clone {} {}", quote(&args.repo_url), quote(&name)))
            .await?;
        info!(repo = %name, exit_code = result.exit_code, "Clone finished");

        Ok(ToolOutput::new(
            title,
            json!({
                "success": result.success,
                "output": result.combined(),
                "repoName": name,
                "alreadyCloned": false,
            }),
        ))
    }
}
