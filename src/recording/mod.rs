//! # Recordings
//!
//! A recording is one transcription job: the uploaded audio, who owns it, and
//! where it is in its lifecycle.
//!
//! ## Components:
//! - **model**: the `Recording` record and its status state machine
//! - **store**: persistence trait plus JSON-file and in-memory backends
//! - **artifacts**: raw audio files keyed by recording id
//! - **service**: submission, listing, reconciliation, and the queue's job handler

pub mod artifacts;
pub mod model;
pub mod service;
pub mod store;

pub use artifacts::ArtifactStore;
pub use model::{Recording, RecordingId};
pub use service::{RecordingService, TranscriptionJobHandler};
pub use store::{JsonRecordingStore, RecordingStore};
