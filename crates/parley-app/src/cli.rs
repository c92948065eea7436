//! CLI argument definitions for the parley client.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use parley_core::types::InputMode;

/// Parley - talk to a voice agent from the terminal.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL, e.g. http://localhost:8000.
    #[arg(short = 'b', long = "base-url", global = true)]
    pub base_url: Option<String>,

    /// Page address carrying the session id. Pass the address printed by a
    /// previous run to resume that conversation.
    #[arg(long = "page-url", global = true)]
    pub page_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Audio file replayed as microphone input.
    #[arg(short = 'i', long = "input-file", global = true)]
    pub input_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive multi-turn conversation (default).
    Chat {
        /// Input mode to start in (speak or type).
        #[arg(short = 'm', long = "mode", default_value = "speak")]
        mode: InputMode,
    },
    /// Synthesize text and play it.
    Tts {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Upload a recording and play it back re-voiced.
    Echo { file: PathBuf },
    /// One-shot question without conversation memory.
    Ask {
        #[arg(required = true)]
        text: Vec<String>,
    },
}

impl CliArgs {
    /// The subcommand to run, `chat` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Chat {
            mode: InputMode::Speak,
        })
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PARLEY_CONFIG env var > platform default (~/.parley/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PARLEY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the backend base URL.
    ///
    /// Priority: --base-url flag > PARLEY_BASE_URL env var > config file value.
    pub fn resolve_base_url(&self, config_url: &str) -> String {
        if let Some(ref url) = self.base_url {
            return url.clone();
        }
        if let Ok(url) = std::env::var("PARLEY_BASE_URL") {
            if !url.trim().is_empty() {
                return url;
            }
        }
        config_url.to_string()
    }

    /// Resolve the page address.
    ///
    /// Priority: --page-url flag > config file value.
    pub fn resolve_page_url(&self, config_url: &str) -> String {
        self.page_url
            .clone()
            .unwrap_or_else(|| config_url.to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".parley").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".parley").join("config.toml");
    }
    PathBuf::from("config.toml")
}
