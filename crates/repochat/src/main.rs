//! repochat - chat with an agent about GitHub repositories.
//!
//! The agent works inside a sandbox where it can clone repositories and
//! inspect them. `repochat serve` runs the HTTP server; `repochat chat` talks
//! to it from the terminal.

mod commands;

use clap::{Parser, Subcommand};
use commands::*;
use repochat_core::{AgentMode, Config, ServerConfig, StorageKind};
use std::path::Path;
use tracing::debug;

#[derive(Parser)]
#[command(name = "repochat")]
#[command(author, version, about = "Chat with an agent about GitHub repositories", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind
        #[arg(short, long)]
        address: Option<String>,
        /// Model to use (provider/model)
        #[arg(short, long)]
        model: Option<String>,
        /// Model calls allowed per turn
        #[arg(long)]
        max_steps: Option<usize>,
        /// Storage backend: memory or json
        #[arg(long, value_parser = parse_storage)]
        storage: Option<StorageKind>,
    },
    /// Chat with a running server
    Chat {
        /// Server address
        #[arg(short, long)]
        address: Option<String>,
        /// Agent mode: bash-tool or workflow
        #[arg(long)]
        mode: Option<AgentMode>,
        /// Forget the saved conversation and start a new one
        #[arg(long)]
        new: bool,
    },
    /// Show configuration
    Config,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Serve {
            address,
            model,
            max_steps,
            storage,
        } => {
            let overrides = Config {
                server: address.map(|address| ServerConfig {
                    address: Some(address),
                }),
                model,
                max_steps,
                storage,
                ..Default::default()
            };
            let config = load_config(&cwd, overrides).await?;
            init_logging(cli.verbose, true, config.log_level());
            run_server(config).await
        }
        Commands::Chat { address, mode, new } => {
            let config = load_config(&cwd, Config::default()).await?;
            if let Some(path) = init_logging(cli.verbose, false, config.log_level()) {
                debug!(path = %path.display(), "Logging to file");
            }
            run_chat(ChatOptions {
                address: address.unwrap_or_else(|| config.address().to_string()),
                mode,
                new_session: new,
            })
            .await
        }
        Commands::Config => show_config(&cwd).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Load configuration with CLI flags applied last.
async fn load_config(cwd: &Path, overrides: Config) -> anyhow::Result<Config> {
    let (config, _sources) = Config::load(Some(cwd)).await?;
    Ok(config.merge(overrides))
}

fn parse_storage(s: &str) -> Result<StorageKind, String> {
    match s {
        "memory" => Ok(StorageKind::Memory),
        "json" => Ok(StorageKind::Json),
        other => Err(format!("unknown storage '{other}' (expected memory or json)")),
    }
}

/// Print version information.
fn print_version() {
    println!("repochat {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Chat with an agent about GitHub repositories in a sandbox.");
}
