//! # Recording Model
//!
//! A `Recording` is one transcription job. Its status only ever moves forward:
//!
//! ```text
//! Queued ──► Processing ──► Completed
//!    │            │
//!    └────────────┴───────► Failed
//! ```
//!
//! Once terminal, exactly one of `transcript` / `failure_reason` is set and the
//! record is frozen. All mutation goes through the transition methods below so
//! that invariant cannot be broken from outside this module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reason recorded when the engine hands back an empty transcript.
pub const EMPTY_TRANSCRIPT_REASON: &str = "transcription engine returned no text";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Queued => "queued",
            RecordingStatus::Processing => "processing",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque recording handle. Also names the audio artifact on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordingId(Uuid);

impl RecordingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("recording {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: RecordingId,
        from: RecordingStatus,
        to: RecordingStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    id: RecordingId,
    owner: String,
    status: RecordingStatus,
    created_at: DateTime<Utc>,
    transcript: Option<String>,
    failure_reason: Option<String>,
}

impl Recording {
    /// Create a new job in the `Queued` state with a fresh id.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            id: RecordingId::new(),
            owner: owner.into(),
            status: RecordingStatus::Queued,
            created_at: Utc::now(),
            transcript: None,
            failure_reason: None,
        }
    }

    pub fn id(&self) -> RecordingId {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Queued → Processing. Called by the worker when it picks the job up.
    pub fn begin_processing(&mut self) -> Result<(), LifecycleError> {
        self.transition(RecordingStatus::Processing, &[RecordingStatus::Queued])
    }

    /// Processing → Completed.
    ///
    /// A blank transcript is recorded as a failure instead, so a terminal
    /// record always carries exactly one non-empty result field.
    pub fn complete(&mut self, transcript: impl Into<String>) -> Result<(), LifecycleError> {
        let transcript = transcript.into();
        if transcript.trim().is_empty() {
            return self.fail(EMPTY_TRANSCRIPT_REASON);
        }
        self.transition(RecordingStatus::Completed, &[RecordingStatus::Processing])?;
        self.transcript = Some(transcript);
        Ok(())
    }

    /// Queued | Processing → Failed.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), LifecycleError> {
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            reason = "unknown error".to_string();
        }
        self.transition(
            RecordingStatus::Failed,
            &[RecordingStatus::Queued, RecordingStatus::Processing],
        )?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Apply an engine outcome in one step.
    pub fn finish(&mut self, outcome: Result<String, String>) -> Result<(), LifecycleError> {
        match outcome {
            Ok(text) => self.complete(text),
            Err(reason) => self.fail(reason),
        }
    }

    fn transition(
        &mut self,
        to: RecordingStatus,
        allowed_from: &[RecordingStatus],
    ) -> Result<(), LifecycleError> {
        if !allowed_from.contains(&self.status) {
            return Err(LifecycleError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
