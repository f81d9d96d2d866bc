//! # Configuration Management
//!
//! Configuration is layered, highest priority first:
//! 1. Environment variables (`APP_SERVER__PORT`, `APP_QUEUE__MAX_PENDING`, ...)
//! 2. `HOST` / `PORT`, as set by most deployment platforms
//! 3. An optional `config.toml` in the working directory
//! 4. Built-in defaults ([`AppConfig::default`])
//!
//! Nested keys use a double underscore so that field names with underscores
//! survive, e.g. `APP_STORAGE__RECORDINGS_DIR=/var/lib/vox/recordings`. List
//! values (`allowed_origins`, `args`) are comma separated.
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: `Serialize`/`Deserialize` derives let the `config` crate turn
//!   layered sources into these structs (and the defaults back into a source)
//! - **Option<T>**: `max_pending: None` is "no cap", distinct from any number
//! - **Result<T, E>**: `load` and `validate` return `anyhow::Result` so `main`
//!   can stop at startup with `?`

use anyhow::Result;                    // Error type with context, used by main
use serde::{Deserialize, Serialize};  // Config <-> struct conversion
use std::env;                          // HOST / PORT overrides

/// Main application configuration, one field per section.
///
/// ## Sections:
/// - `server`: where to listen, which browser origins may call us
/// - `storage`: audio files and recording records on disk
/// - `queue`: submission cap and startup recovery
/// - `transcription`: the external engine command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub transcription: TranscriptionConfig,
}

/// HTTP listener settings.
///
/// `allowed_origins` lists browser origins permitted by CORS; the UI dev
/// server is allowed by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

/// Where uploaded audio and recording records live.
///
/// ## Fields:
/// - `recordings_dir`: raw audio, one file per recording id
/// - `database_dir`: recording records, one JSON file per recording id
/// - `max_upload_bytes`: largest accepted upload (default 100 MiB)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub recordings_dir: String,
    pub database_dir: String,
    pub max_upload_bytes: usize,  // usize: compared directly against buffered byte counts
}

/// Job queue policy.
///
/// - `max_pending`: reject submissions once this many jobs wait; unset means unbounded
/// - `reconcile_on_startup`: fail orphaned `processing` records and re-enqueue `queued` ones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_pending: Option<usize>,
    pub reconcile_on_startup: bool,
}

/// External speech-to-text engine invocation.
///
/// `{input}` in `args` is replaced by the absolute audio path, `{model}` by `model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub command: String,
    pub args: Vec<String>,
    pub model: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                allowed_origins: vec!["http://localhost:5174".to_string()],
            },
            storage: StorageConfig {
                recordings_dir: "recordings".to_string(),
                database_dir: "data/recordings".to_string(),
                max_upload_bytes: 100 * 1024 * 1024,
            },
            queue: QueueConfig {
                max_pending: None,
                reconcile_on_startup: true,
            },
            transcription: TranscriptionConfig {
                command: "whisper-cli".to_string(),
                args: vec![
                    "--model".to_string(),
                    "{model}".to_string(),
                    "--no-timestamps".to_string(),
                    "--file".to_string(),
                    "{input}".to_string(),
                ],
                model: "models/ggml-large-v3.bin".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## What this does:
    /// 1. Serializes [`AppConfig::default`] as the lowest layer
    /// 2. Merges `config.toml` if present
    /// 3. Merges `APP_*` environment variables
    /// 4. Applies the bare `HOST` / `PORT` overrides
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`: override server port
    /// - `APP_SERVER__ALLOWED_ORIGINS=https://a.example,https://b.example`: list value
    /// - `APP_QUEUE__MAX_PENDING=64`: cap the queue
    /// - `APP_TRANSCRIPTION__MODEL=models/ggml-base.en.bin`: switch engine model
    /// - `PORT=3000`: deployment platform override
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Defaults, converted from our Default impl
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. config.toml, skipped when missing
            .add_source(config::File::with_name("config").required(false))
            // 3. APP_SECTION__FIELD environment variables
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    // Only these keys are split on commas; other strings stay whole
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .with_list_parse_key("transcription.args")
                    // "8000" -> u16, "true" -> bool
                    .try_parsing(true),
            );

        // Platform-style variables without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the merged view and deserialize it back into AppConfig
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Both storage directories are set, and the upload limit is positive
    /// - `max_pending`, when set, allows at least one job
    /// - The engine command is set and its args take the audio path (`{input}`)
    ///
    /// ## Rust Concepts:
    /// - **&self**: read-only borrow, validation never mutates
    /// - **anyhow!**: builds an ad-hoc error message without a dedicated type
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.recordings_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Recordings directory must be set"));
        }

        if self.storage.database_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Database directory must be set"));
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum upload size must be greater than 0"));
        }

        if self.queue.max_pending == Some(0) {
            return Err(anyhow::anyhow!(
                "Queue max_pending must be greater than 0 (omit it for an unbounded queue)"
            ));
        }

        if self.transcription.command.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcription command must be set"));
        }

        if !self.transcription.args.iter().any(|arg| arg.contains("{input}")) {
            return Err(anyhow::anyhow!(
                "Transcription args must contain an {{input}} placeholder"
            ));
        }

        Ok(())
    }
}
