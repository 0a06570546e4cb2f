//! The `chat` command: an interactive terminal client.
//!
//! In workflow mode the first message starts a durable run and every later
//! message is a follow-up to it. The run's stream is printed as it arrives
//! and can be re-attached with `/reconnect`. In bash-tool mode each message
//! is one request carrying the whole conversation.

use anyhow::Context;
use futures::StreamExt;
use repochat_client::{
    ChatTransport, ChunkStream, ClientError, SessionContext, SplitStrategy, Transcript, Turn,
    TurnPart, TurnRole, TurnStatus,
};
use repochat_core::{AgentMode, Chunk, UiMessage, DONE_SENTINEL};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Options for `repochat chat`.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub address: String,
    pub mode: Option<AgentMode>,
    pub new_session: bool,
}

/// Run the interactive chat loop until `/exit` or end of input.
pub async fn run_chat(options: ChatOptions) -> anyhow::Result<()> {
    let mut session = match SessionContext::default_path() {
        Some(path) => SessionContext::load(path)?,
        None => SessionContext::in_memory(),
    };
    if options.new_session {
        session.clear()?;
    }
    if let Some(mode) = options.mode {
        if mode != session.agent_mode() {
            // A conversation never changes mode.
            session.clear()?;
            session.set_agent_mode(mode)?;
        }
    }

    let transport = ChatTransport::new(&options.address)?;
    let health = transport
        .health()
        .await
        .with_context(|| format!("no repochat server at {}", transport.base_url()))?;
    println!(
        "Connected to repochat {} at {} ({} mode)",
        health.version,
        transport.base_url(),
        session.agent_mode()
    );
    println!("Commands: /done ends the conversation, /clear starts over, /history, /status, /reconnect, /exit");
    println!();

    let mut chat = Chat::new(transport, session);
    chat.resume().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match line {
            "/exit" | "/quit" => break,
            "/clear" => chat.clear().await,
            "/history" => {
                chat.print_history().await;
                Ok(())
            }
            "/status" => {
                chat.print_status().await;
                Ok(())
            }
            "/reconnect" => {
                chat.reconnect().await;
                Ok(())
            }
            text => chat.send(text).await,
        };
        if let Err(e) = result {
            eprintln!("error: {e:#}");
        }
    }

    chat.detach();
    Ok(())
}

struct Chat {
    transport: ChatTransport,
    session: SessionContext,
    transcript: Arc<Mutex<Transcript>>,
    pump: Option<JoinHandle<()>>,
}

impl Chat {
    fn new(transport: ChatTransport, session: SessionContext) -> Self {
        Self {
            transport,
            session,
            transcript: Arc::new(Mutex::new(Transcript::new())),
            pump: None,
        }
    }

    fn mode(&self) -> AgentMode {
        self.session.agent_mode()
    }

    async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        match self.mode() {
            AgentMode::Workflow => self.send_workflow(text).await,
            AgentMode::BashTool => self.send_bash(text).await,
        }
    }

    async fn send_workflow(&mut self, text: &str) -> anyhow::Result<()> {
        let conversation_id = self.session.conversation_id()?;

        let Some(run_id) = self.session.run_id().map(str::to_string) else {
            if text == DONE_SENTINEL {
                println!("No conversation is open.");
                return Ok(());
            }
            {
                let mut transcript = self.transcript.lock().await;
                transcript.clear();
                transcript.record_user(text);
            }
            let started = self
                .transport
                .start(&conversation_id, &[UiMessage::user(text)])
                .await?;
            if let Some(run_id) = &started.run_id {
                debug!(run_id = %run_id, conversation_id = %conversation_id, "Run started");
                self.session.set_run_id(run_id)?;
                self.session.set_first_message(text)?;
            }
            if let Some(sandbox_id) = &started.sandbox_id {
                self.session.set_sandbox_id(sandbox_id)?;
            }
            self.spawn_pump(started.chunks);
            return Ok(());
        };

        let ack = {
            let mut transcript = self.transcript.lock().await;
            self.transport
                .send_follow_up(&mut transcript, &conversation_id, Some(&run_id), text)
                .await
        };
        match ack {
            Ok(ack) => debug!(seq = ?ack.seq, "Follow-up accepted"),
            Err(ClientError::Status { status: 404, .. }) => {
                println!("That conversation has ended. Your next message starts a new one.");
                return self.reset().await;
            }
            Err(e) => return Err(e.into()),
        }

        if text == DONE_SENTINEL {
            if let Some(pump) = self.pump.take() {
                if let Err(e) = pump.await {
                    warn!(error = %e, "Stream task failed");
                }
            }
            println!("Conversation ended.");
            self.reset().await?;
        }
        Ok(())
    }

    async fn send_bash(&mut self, text: &str) -> anyhow::Result<()> {
        if text == DONE_SENTINEL {
            println!("Conversation ended.");
            return self.reset().await;
        }

        let conversation_id = self.session.conversation_id()?;
        let history = {
            let mut transcript = self.transcript.lock().await;
            transcript.record_user(text);
            history_messages(&transcript)
        };

        let started = self
            .transport
            .turn(&conversation_id, self.session.sandbox_id(), &history)
            .await?;
        if let Some(sandbox_id) = &started.sandbox_id {
            if self.session.sandbox_id() != Some(sandbox_id.as_str()) {
                debug!(sandbox_id = %sandbox_id, "Using sandbox");
                self.session.set_sandbox_id(sandbox_id)?;
            }
        }

        pump(started.chunks, self.transcript.clone()).await;
        Ok(())
    }

    /// Re-attach to the conversation left open by a previous session.
    async fn resume(&mut self) {
        if self.mode() != AgentMode::Workflow {
            return;
        }
        let (Some(conversation_id), Some(run_id)) = (
            self.session.current_conversation_id().map(str::to_string),
            self.session.run_id().map(str::to_string),
        ) else {
            return;
        };

        match self.transport.status(&conversation_id).await {
            Ok(status) if matches!(status["status"].as_str(), Some("terminated" | "failed")) => {
                if let Err(e) = self.reset().await {
                    warn!(error = %e, "Failed to clear finished session");
                }
            }
            Ok(_) => {
                println!("Resuming conversation {conversation_id} (run {run_id})");
                *self.transcript.lock().await = resumed_transcript(&self.session);
                self.reconnect().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not resume conversation");
                println!("Could not resume the previous conversation: {e}");
            }
        }
    }

    /// Re-attach to the run from the last chunk received.
    async fn reconnect(&mut self) {
        let start_index = self.transcript.lock().await.received();
        match self.transport.reconnect(
            self.session.current_conversation_id(),
            self.session.run_id(),
            start_index,
        ) {
            Ok(chunks) => self.spawn_pump(chunks),
            Err(e) => println!("Cannot reconnect: {e}"),
        }
    }

    async fn clear(&mut self) -> anyhow::Result<()> {
        self.reset().await?;
        println!("Session cleared.");
        Ok(())
    }

    async fn reset(&mut self) -> anyhow::Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.transcript.lock().await.clear();
        self.session.clear()?;
        Ok(())
    }

    async fn print_history(&self) {
        let transcript = self.transcript.lock().await;
        let turns = match self.mode() {
            AgentMode::Workflow => transcript.turns(SplitStrategy::Markers),
            AgentMode::BashTool => transcript.turns(SplitStrategy::Indices(transcript.splits())),
        };
        if turns.is_empty() {
            println!("No messages yet.");
        }
        for turn in &turns {
            print_turn(turn);
        }
    }

    async fn print_status(&self) {
        let Some(conversation_id) = self.session.current_conversation_id() else {
            println!("No conversation is open.");
            return;
        };
        if self.mode() == AgentMode::BashTool {
            println!("conversation: {conversation_id}");
            println!("sandbox:      {}", self.session.sandbox_id().unwrap_or("-"));
            return;
        }
        match self.transport.status(conversation_id).await {
            Ok(status) => match serde_json::to_string_pretty(&status) {
                Ok(text) => println!("{text}"),
                Err(e) => println!("{e}"),
            },
            Err(e) => println!("Status unavailable: {e}"),
        }
    }

    fn spawn_pump(&mut self, chunks: ChunkStream) {
        if let Some(previous) = self.pump.take() {
            previous.abort();
        }
        self.pump = Some(tokio::spawn(pump(chunks, self.transcript.clone())));
    }

    /// Stop printing. An open workflow run stays suspended on the server.
    fn detach(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let (AgentMode::Workflow, Some(run_id)) = (self.mode(), self.session.run_id()) {
            println!("Run {run_id} stays open; `repochat chat` picks it up again.");
        }
    }
}

/// An empty transcript for a run started by an earlier session. The run's
/// stream replays every turn except the message that started it.
fn resumed_transcript(session: &SessionContext) -> Transcript {
    let mut transcript = Transcript::new();
    if let Some(text) = session.first_message() {
        transcript.record_user(text);
    }
    transcript
}

/// Print a stream and record its chunks until it ends.
async fn pump(mut chunks: ChunkStream, transcript: Arc<Mutex<Transcript>>) {
    while let Some(item) = chunks.next().await {
        match item {
            Ok(indexed) => {
                render(&indexed.chunk);
                transcript.lock().await.push_chunk(indexed.chunk);
            }
            Err(e) => {
                warn!(error = %e, "Stream ended with an error");
                eprintln!("\nstream lost: {e}. Type /reconnect to resume.");
                return;
            }
        }
    }
}

/// Conversation so far as client messages, for a bash-tool request.
fn history_messages(transcript: &Transcript) -> Vec<UiMessage> {
    transcript
        .turns(SplitStrategy::Indices(transcript.splits()))
        .iter()
        .filter_map(|turn| {
            let text = turn.text();
            if text.trim().is_empty() {
                return None;
            }
            Some(match turn.role {
                TurnRole::User => UiMessage::user(text),
                TurnRole::Assistant => UiMessage::assistant(text),
            })
        })
        .collect()
}

fn render(chunk: &Chunk) {
    let mut out = std::io::stdout().lock();
    let written = match chunk {
        Chunk::StreamStart { .. } => writeln!(out),
        Chunk::TextDelta { delta } => write!(out, "{delta}"),
        Chunk::ToolCallStart {
            tool_name, input, ..
        } => writeln!(out, "\n  → {tool_name} {input}"),
        Chunk::ToolCallResult {
            tool_name,
            error_text: Some(error),
            ..
        } => writeln!(out, "  ✗ {tool_name}: {error}"),
        Chunk::ToolCallResult { tool_name, .. } => writeln!(out, "  ✓ {tool_name}"),
        Chunk::DataUserMessage { .. } => Ok(()),
        Chunk::Error { error_text } => writeln!(out, "\nerror: {error_text}"),
        Chunk::Finish => writeln!(out, "\n[conversation finished]"),
    };
    if written.and_then(|_| out.flush()).is_err() {
        debug!("stdout closed");
    }
}

fn print_turn(turn: &Turn) {
    let label = match turn.role {
        TurnRole::User => "you",
        TurnRole::Assistant => "assistant",
    };
    let pending = if turn.status == TurnStatus::Pending {
        " (pending)"
    } else {
        ""
    };
    println!("{label}{pending}:");
    for part in &turn.parts {
        match part {
            TurnPart::Text { text } => println!("  {text}"),
            TurnPart::ToolCall {
                tool_name,
                error_text,
                output,
                ..
            } => match (error_text, output) {
                (Some(error), _) => println!("  [{tool_name}] failed: {error}"),
                (None, Some(_)) => println!("  [{tool_name}] done"),
                (None, None) => println!("  [{tool_name}] running"),
            },
            TurnPart::Error { text } => println!("  error: {text}"),
        }
    }
}

fn prompt() {
    let mut out = std::io::stdout().lock();
    if write!(out, "\n> ").and_then(|_| out.flush()).is_err() {
        debug!("stdout closed");
    }
}
