//! # Transcription Module
//!
//! The transcription engine is an external, resource-exclusive collaborator:
//! it turns an audio file into text, may take minutes, and must never run two
//! requests at once. The job queue guarantees the latter by having a single
//! worker; this module only defines the call shape.
//!
//! ## Implementations:
//! - **CommandTranscriber**: runs a speech-to-text CLI (e.g. whisper.cpp's `whisper-cli`)
//! - **closures**: any `Fn(&Path) -> anyhow::Result<String>`, handy for tests

pub mod command;

pub use command::CommandTranscriber;

use anyhow::Result;
use std::path::Path;

/// Blocking speech-to-text engine.
///
/// Called from the tokio blocking pool, never from an async context, so
/// implementations are free to block for as long as inference takes.
pub trait Transcriber: Send + Sync + 'static {
    fn transcribe(&self, audio: &Path) -> Result<String>;
}

impl<F> Transcriber for F
where
    F: Fn(&Path) -> Result<String> + Send + Sync + 'static,
{
    fn transcribe(&self, audio: &Path) -> Result<String> {
        self(audio)
    }
}
