//! Parley application binary - composition root.
//!
//! 1. Parse the CLI and load configuration from TOML
//! 2. Install the tracing subscriber
//! 3. Build the backend client, speaker and fallback narrator
//! 4. Run the interactive conversation or a one-shot flow

mod cli;
mod devices;
mod oneshot;
mod terminal;

use std::sync::Arc;

use clap::Parser;

use parley_capture::FileMicrophone;
use parley_conversation::{ConversationOrchestrator, InMemoryLocation, Location, SessionIdentity};
use parley_core::config::ParleyConfig;
use parley_exchange::HttpExchange;
use parley_playback::{FallbackNarrator, SequentialPlayer};

use crate::cli::{CliArgs, Command};
use crate::oneshot::OneShot;
use crate::terminal::TerminalView;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let mut config = ParleyConfig::load_or_default(&config_file);
    config.backend.base_url = args.resolve_base_url(&config.backend.base_url);
    config.session.page_url = args.resolve_page_url(&config.session.page_url);
    config.general.log_level = args.resolve_log_level(&config.general.log_level);

    // Tracing. Conversation output owns stdout, logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        path = %config_file.display(),
        found = config_exists,
        base_url = %config.backend.base_url,
        "Configuration resolved"
    );
    config.validate()?;

    // Shared pieces.
    let exchange = HttpExchange::from_config(&config.backend)?;
    let player = SequentialPlayer::new(devices::speaker());
    let narrator = FallbackNarrator::from_config(&config.narrator);

    match args.command() {
        Command::Chat { mode } => {
            let location = InMemoryLocation::parse(&config.session.page_url)?;
            let session = SessionIdentity::from_config(&config.session)?.ensure_session(&location);

            let microphone = devices::microphone(args.input_file.as_deref(), &config);
            let capture = devices::capture_controller(microphone, &config)?;

            let orchestrator = ConversationOrchestrator::new(
                session,
                capture,
                Arc::new(exchange),
                player,
                narrator,
                Arc::new(TerminalView),
            )
            .with_mode(mode);

            terminal::run_chat(Arc::new(orchestrator), location.href()).await?;
        }
        Command::Tts { text } => {
            let flow = OneShot {
                exchange: &exchange,
                player: &player,
                narrator: &narrator,
            };
            flow.tts(&text.join(" ")).await?;
        }
        Command::Echo { file } => {
            let payload = FileMicrophone::from_config(&file, &config.capture)
                .read_payload()
                .await?;
            let flow = OneShot {
                exchange: &exchange,
                player: &player,
                narrator: &narrator,
            };
            flow.echo(&payload).await?;
        }
        Command::Ask { text } => {
            let flow = OneShot {
                exchange: &exchange,
                player: &player,
                narrator: &narrator,
            };
            flow.ask(&text.join(" ")).await?;
        }
    }

    Ok(())
}
