//! The `config` command.

use repochat_core::Config;
use std::path::Path;

/// Print the merged configuration and where it came from.
pub async fn show_config(cwd: &Path) -> anyhow::Result<()> {
    let (config, sources) = Config::load(Some(cwd)).await?;

    println!("Configuration sources:");
    if sources.is_empty() {
        println!("  (none)");
    } else {
        for source in &sources {
            println!("  {}", source.display());
        }
    }
    println!();

    let (provider, model) = config.provider_and_model();
    println!("Effective settings:");
    println!("  address:   {}", config.address());
    println!("  model:     {provider}/{model}");
    println!("  maxSteps:  {}", config.max_steps());
    println!("  storage:   {:?}", config.storage_kind());
    if let Some(dir) = config.data_dir() {
        println!("  dataDir:   {}", dir.display());
    }
    println!();

    println!("Current configuration:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
