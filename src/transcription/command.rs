//! External-process transcription engine.
//!
//! The configured program is run once per job with `{input}` and `{model}`
//! placeholders substituted into its arguments. Trimmed stdout is the
//! transcript; a non-zero exit is a failure carrying the program's stderr.

use crate::config::TranscriptionConfig;
use crate::transcription::Transcriber;
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
    model: String,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>, args: Vec<String>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            model: model.into(),
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone(), config.model.clone())
    }

    fn render_args(&self, audio: &Path) -> Vec<String> {
        let input = audio.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{model}", &self.model))
            .collect()
    }
}

impl Transcriber for CommandTranscriber {
    fn transcribe(&self, audio: &Path) -> Result<String> {
        let args = self.render_args(audio);
        let started = Instant::now();
        tracing::debug!(program = %self.program, ?args, "Invoking transcription engine");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("failed to execute transcription engine `{}`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "transcription engine exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            bail!("transcription engine produced no output");
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = text.len(),
            "Transcription engine finished"
        );
        Ok(text)
    }
}
