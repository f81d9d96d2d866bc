//! # Application State
//!
//! `AppState` is cloned into every actix worker. Everything inside is either
//! immutable or behind `Arc`, so clones are cheap and share the same queue,
//! stores, and metrics.
//!
//! ## Ownership of the job pipeline:
//! The job queue is created exactly once, in [`AppState::build`], and reached
//! through `recordings.queue()`. `main` owns its lifecycle: it calls `start()`
//! before serving and `stop()` after the HTTP server has shut down.

use crate::config::AppConfig;
use crate::queue::JobQueue;
use crate::recording::{
    ArtifactStore, JsonRecordingStore, RecordingService, RecordingStore, TranscriptionJobHandler,
};
use crate::transcription::{CommandTranscriber, Transcriber};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub recordings: Arc<RecordingService>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Request counters collected by the metrics middleware.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Keyed by `"<METHOD> <route pattern>"`, e.g. `"GET /api/recording/{id}"`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wire up the production pipeline: JSON record store, on-disk audio
    /// artifacts, and the configured external transcription engine.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn RecordingStore> = Arc::new(
            JsonRecordingStore::open(&config.storage.database_dir)
                .await
                .context("failed to open recording store")?,
        );
        let artifacts = Arc::new(
            ArtifactStore::open(&config.storage.recordings_dir)
                .await
                .context("failed to open recordings directory")?,
        );
        let engine: Arc<dyn Transcriber> =
            Arc::new(CommandTranscriber::from_config(&config.transcription));

        Ok(Self::assemble(config, store, artifacts, engine))
    }

    /// Build state around arbitrary collaborators. The queue is created here
    /// but not started.
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn RecordingStore>,
        artifacts: Arc<ArtifactStore>,
        engine: Arc<dyn Transcriber>,
    ) -> Self {
        let handler = TranscriptionJobHandler::new(store.clone(), artifacts.clone(), engine);
        let queue = Arc::new(JobQueue::with_capacity(
            Arc::new(handler),
            config.queue.max_pending,
        ));

        Self {
            config: Arc::new(config),
            recordings: Arc::new(RecordingService::new(store, artifacts, queue)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Count one finished request against its endpoint.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the counters, so the lock is not held while responding.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
