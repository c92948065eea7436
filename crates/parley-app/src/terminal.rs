//! Terminal front end: renders conversation events and reads commands from stdin.

use std::str::FromStr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use url::Url;

use parley_conversation::{ActionOutcome, ConversationOrchestrator, ConversationView};
use parley_core::error::Result;
use parley_core::events::ConversationEvent;
use parley_core::types::InputMode;

const HELP: &str = "\
commands:
  start          begin recording
  stop           stop recording and send
  say <text>     send a typed message (type mode)
  mode speak     switch to speaking
  mode type      switch to typing
  status         show the current state
  help           show this help
  quit           leave";

/// Prints the status line and results panels to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalView;

impl TerminalView {
    fn render(event: &ConversationEvent) -> Option<String> {
        match event {
            ConversationEvent::StatusChanged { text } => Some(format!("[status] {}", text)),
            ConversationEvent::TranscriptionShown { text } => Some(format!("you:   {}", text)),
            ConversationEvent::ReplyShown { text } => Some(format!("agent: {}", text)),
            ConversationEvent::ModeChanged { mode } => Some(format!("[mode] {}", mode)),
            _ => None,
        }
    }
}

impl ConversationView for TerminalView {
    fn apply(&self, event: &ConversationEvent) {
        match Self::render(event) {
            Some(line) => println!("{}", line),
            None => tracing::debug!(?event, "Conversation event"),
        }
    }
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Stop,
    Say(String),
    Mode(InputMode),
    Status,
    Help,
    Quit,
}

impl FromStr for ChatCommand {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match word.to_ascii_lowercase().as_str() {
            "start" => Ok(ChatCommand::Start),
            "stop" => Ok(ChatCommand::Stop),
            "say" | "send" => Ok(ChatCommand::Say(rest.to_string())),
            "mode" => rest.parse().map(ChatCommand::Mode),
            "status" => Ok(ChatCommand::Status),
            "help" | "?" => Ok(ChatCommand::Help),
            "quit" | "exit" => Ok(ChatCommand::Quit),
            other => Err(format!("unknown command: {} (try 'help')", other)),
        }
    }
}

fn report(outcome: &ActionOutcome) {
    if let ActionOutcome::Ignored(state) = outcome {
        println!("(busy: {}, ignored)", state);
    }
}

/// Run the interactive loop until `quit` or end of input.
///
/// Turn actions run as their own tasks so the loop keeps reading while a turn
/// is in flight; anything typed meanwhile is ignored by the orchestrator.
pub async fn run_chat(orchestrator: Arc<ConversationOrchestrator>, page: Url) -> Result<()> {
    println!("session {}", orchestrator.session());
    println!("resume later with --page-url '{}'", page);
    println!("{}", HELP);
    orchestrator.show_ready();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turns: JoinSet<ActionOutcome> = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        while let Some(done) = turns.try_join_next() {
            match done {
                Ok(outcome) => report(&outcome),
                Err(e) => tracing::warn!(error = %e, "Turn task failed"),
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ChatCommand>() {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };
        tracing::debug!(?command, "Command");

        match command {
            ChatCommand::Quit => break,
            ChatCommand::Help => println!("{}", HELP),
            ChatCommand::Status => println!(
                "[state] {} (controls: {:?})",
                orchestrator.state(),
                orchestrator.controls()
            ),
            ChatCommand::Mode(mode) => report(&orchestrator.switch_mode(mode)),
            ChatCommand::Start => {
                let orchestrator = Arc::clone(&orchestrator);
                turns.spawn(async move { orchestrator.start_recording().await });
            }
            ChatCommand::Stop => {
                let orchestrator = Arc::clone(&orchestrator);
                turns.spawn(async move { orchestrator.stop_recording().await });
            }
            ChatCommand::Say(text) => {
                let orchestrator = Arc::clone(&orchestrator);
                turns.spawn(async move { orchestrator.submit_text(&text).await });
            }
        }
    }

    turns.abort_all();
    orchestrator.shutdown().await;
    tracing::info!("Chat ended");
    Ok(())
}
