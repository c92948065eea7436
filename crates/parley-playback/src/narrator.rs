//! On-device fallback speech.
//!
//! When the backend produced no audio the narrator speaks the status message
//! locally. A missing speech capability makes it a silent no-op; the status
//! text already carries the message.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use parley_core::config::NarratorConfig;

use crate::error::NarratorError;

/// Local text-to-speech capability.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, message: &str) -> Result<(), NarratorError>;
}

/// Speaks fallback messages when a synthesizer is available.
#[derive(Clone)]
pub struct FallbackNarrator {
    synth: Option<Arc<dyn SpeechSynthesizer>>,
}

impl std::fmt::Debug for FallbackNarrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackNarrator")
            .field("available", &self.is_available())
            .finish()
    }
}

impl FallbackNarrator {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synth: Some(synth) }
    }

    /// A narrator with no speech capability.
    pub fn silent() -> Self {
        Self { synth: None }
    }

    /// Build from config, probing the system for a speech command.
    pub fn from_config(config: &NarratorConfig) -> Self {
        if !config.enabled {
            tracing::debug!("Fallback speech disabled by config");
            return Self::silent();
        }
        let speech = match config.command.as_deref() {
            Some(command) => SystemSpeech::with_command(command),
            None => SystemSpeech::detect(),
        };
        match speech {
            Some(speech) => {
                tracing::info!(program = %speech.program.display(), "Fallback speech available");
                Self::new(Arc::new(speech))
            }
            None => {
                tracing::info!("No speech command found; fallback speech is silent");
                Self::silent()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.synth.is_some()
    }

    /// Speak `message`. Returns whether anything was spoken; never fails.
    pub async fn speak(&self, message: &str) -> bool {
        let Some(synth) = &self.synth else {
            return false;
        };
        if message.trim().is_empty() {
            return false;
        }
        match synth.speak(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Fallback speech failed");
                false
            }
        }
    }
}

// =============================================================================
// System speech command
// =============================================================================

const KNOWN_COMMANDS: &[&str] = &["say", "espeak-ng", "espeak", "spd-say"];

/// Speaks through a speech command found on the system (`say`, `espeak`, ...).
///
/// The command is started with the message as its last argument and left to
/// finish in the background.
#[derive(Debug, Clone)]
pub struct SystemSpeech {
    program: PathBuf,
    args: Vec<String>,
}

impl SystemSpeech {
    /// Look for a known speech command on `PATH`.
    pub fn detect() -> Option<Self> {
        KNOWN_COMMANDS.iter().find_map(|name| {
            which::which(name).ok().map(|program| Self {
                program,
                args: Vec::new(),
            })
        })
    }

    /// Use an explicit command line such as `"espeak -s 150"`.
    pub fn with_command(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        let program = which::which(program).unwrap_or_else(|_| PathBuf::from(program));
        Some(Self {
            program,
            args: parts.map(str::to_string).collect(),
        })
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

#[async_trait]
impl SpeechSynthesizer for SystemSpeech {
    async fn speak(&self, message: &str) -> Result<(), NarratorError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| NarratorError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let program = self.program.display().to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::warn!(program = %program, status = %status, "Speech command exited with failure");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(program = %program, error = %e, "Speech command lost"),
            }
        });
        Ok(())
    }
}

// =============================================================================
// Mock synthesizer
// =============================================================================

/// Records every message instead of speaking it.
#[derive(Debug, Clone, Default)]
pub struct MockSynthesizer {
    spoken: Arc<Mutex<Vec<String>>>,
    failing: bool,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A synthesizer whose every call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn speak(&self, message: &str) -> Result<(), NarratorError> {
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(message.to_string());
        }
        if self.failing {
            return Err(NarratorError::Synthesis("mock failure".to_string()));
        }
        Ok(())
    }
}
