//! Server state.

use repochat_core::{
    system_prompt, AgentConfig, AgentMode, BashToolAgent, Config, RunEnv, RunManager,
    SandboxDirectory,
};
use repochat_provider::BoxedLanguageModel;
use repochat_sandbox::SharedSandboxProvider;
use repochat_storage::{MemoryStorage, SharedStorage};
use repochat_tools::ToolRegistry;
use std::sync::Arc;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Workflow-mode runs.
    pub runs: Arc<RunManager>,
    /// Bash-tool mode turns.
    pub bash: Arc<BashToolAgent>,
}

impl AppState {
    pub fn new(runs: RunManager, bash: BashToolAgent) -> Self {
        Self {
            runs: Arc::new(runs),
            bash: Arc::new(bash),
        }
    }

    /// Wire both modes from configuration.
    ///
    /// Runs are kept in `storage`. The bash-tool sandbox map lives in process
    /// memory and is lost on restart.
    pub fn from_config(
        config: &Config,
        storage: SharedStorage,
        sandboxes: SharedSandboxProvider,
        model: BoxedLanguageModel,
    ) -> Self {
        let env = RunEnv {
            storage,
            sandboxes: sandboxes.clone(),
            model: model.clone(),
            tools: Arc::new(ToolRegistry::workflow()),
            system: system_prompt(AgentMode::Workflow),
        };
        let runs = RunManager::new(env, config.max_steps());

        let bash = BashToolAgent::new(
            model,
            sandboxes,
            SandboxDirectory::new(Arc::new(MemoryStorage::new())),
            AgentConfig {
                system: system_prompt(AgentMode::BashTool),
                max_steps: config.max_steps(),
                ..Default::default()
            },
        );

        Self::new(runs, bash)
    }
}
