//! In-memory sandbox provider.
//!
//! Commands are recorded rather than executed. A few commands get built-in
//! behaviour so tool adapters can be exercised end to end:
//!
//! - `mkdir -p <dir>` and `git clone <url> <dir>` create `<dir>`
//! - `test -d <dir> && echo exists || echo not_exists` reports on it
//!
//! Everything else returns the configured response for that command, or the
//! default (empty success).

use async_trait::async_trait;
use repochat_sandbox::{
    Sandbox, SandboxError, SandboxHandle, SandboxOutput, SandboxProvider, SandboxResult,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A recorded command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub sandbox_id: String,
    pub command: String,
}

#[derive(Default)]
struct State {
    live: HashMap<String, Arc<Mutex<BTreeSet<String>>>>,
    executed: Vec<ExecutedCommand>,
    exact: HashMap<String, SandboxOutput>,
    prefixes: Vec<(String, SandboxOutput)>,
    create_error: Option<String>,
}

/// Sandbox provider backed by memory.
#[derive(Clone, Default)]
pub struct RecordingSandboxProvider {
    state: Arc<Mutex<State>>,
    created: Arc<AtomicUsize>,
}

impl RecordingSandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to exactly `command` with `output`.
    pub fn with_command_response(self, command: &str, output: SandboxOutput) -> Self {
        self.state
            .lock()
            .unwrap()
            .exact
            .insert(command.to_string(), output);
        self
    }

    /// Respond to any command starting with `prefix` with `output`.
    pub fn with_prefix_response(self, prefix: &str, output: SandboxOutput) -> Self {
        self.state
            .lock()
            .unwrap()
            .prefixes
            .push((prefix.to_string(), output));
        self
    }

    /// Make every `create` call fail.
    pub fn failing_create(self, message: &str) -> Self {
        self.state.lock().unwrap().create_error = Some(message.to_string());
        self
    }

    /// Register a sandbox with a known identifier.
    pub fn insert(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .live
            .insert(id.to_string(), Arc::default());
    }

    /// Number of successful `create` calls.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Identifiers of sandboxes that have not been stopped.
    pub fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().unwrap().live.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every command run so far, in order.
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Command strings run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.executed().into_iter().map(|c| c.command).collect()
    }

    pub fn command_was_executed(&self, command: &str) -> bool {
        self.commands().iter().any(|c| c == command)
    }

    /// How many commands started with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn handle(&self, id: String, dirs: Arc<Mutex<BTreeSet<String>>>) -> SandboxHandle {
        Arc::new(RecordingSandbox {
            id,
            dirs,
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl SandboxProvider for RecordingSandboxProvider {
    async fn create(&self) -> SandboxResult<SandboxHandle> {
        let (id, dirs) = {
            let mut state = self.state.lock().unwrap();
            if let Some(message) = &state.create_error {
                return Err(SandboxError::CreateFailed(message.clone()));
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("sbx_mock{n}");
            let dirs: Arc<Mutex<BTreeSet<String>>> = Arc::default();
            state.live.insert(id.clone(), dirs.clone());
            (id, dirs)
        };
        Ok(self.handle(id, dirs))
    }

    async fn get(&self, id: &str) -> SandboxResult<SandboxHandle> {
        let dirs = self
            .state
            .lock()
            .unwrap()
            .live
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;
        Ok(self.handle(id.to_string(), dirs))
    }

    async fn stop(&self, id: &str) -> SandboxResult<()> {
        self.state.lock().unwrap().live.remove(id);
        Ok(())
    }
}

struct RecordingSandbox {
    id: String,
    dirs: Arc<Mutex<BTreeSet<String>>>,
    state: Arc<Mutex<State>>,
}

fn unquote(word: &str) -> String {
    word.trim_matches(|c| c == '\'' || c == '"').to_string()
}

impl RecordingSandbox {
    fn builtin(&self, command: &str) -> Option<SandboxOutput> {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            ["test", "-d", dir, "&&", ..] => {
                let exists = self.dirs.lock().unwrap().contains(&unquote(dir));
                Some(SandboxOutput::success(if exists {
                    "exists\n"
                } else {
                    "not_exists\n"
                }))
            }
            ["git", "clone", _url, dir] => {
                let dir = unquote(dir);
                let stderr = format!("Cloning into '{dir}'...\n");
                self.dirs.lock().unwrap().insert(dir);
                Some(SandboxOutput::from_output(String::new(), stderr, 0))
            }
            ["mkdir", "-p", dir] => {
                self.dirs.lock().unwrap().insert(unquote(dir));
                Some(SandboxOutput::success(""))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Sandbox for RecordingSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(&self, command: &str) -> SandboxResult<SandboxOutput> {
        let configured = {
            let mut state = self.state.lock().unwrap();
            if !state.live.contains_key(&self.id) {
                return Err(SandboxError::NotFound(self.id.clone()));
            }
            state.executed.push(ExecutedCommand {
                sandbox_id: self.id.clone(),
                command: command.to_string(),
            });
            state.exact.get(command).cloned().or_else(|| {
                state
                    .prefixes
                    .iter()
                    .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                    .map(|(_, output)| output.clone())
            })
        };

        Ok(configured
            .or_else(|| self.builtin(command))
            .unwrap_or_else(|| SandboxOutput::success("")))
    }
}
