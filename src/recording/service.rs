//! # Recording Service
//!
//! Ties the job queue to persistence and the transcription engine.
//!
//! ## Submission (`submit`):
//! 1. Persist the recording as `Queued`
//! 2. Hand it to the job queue
//! 3. Return without waiting for transcription
//!
//! Persisting first means a crash after step 1 leaves a `Queued` record that
//! startup reconciliation re-enqueues.
//!
//! ## Processing (`TranscriptionJobHandler`):
//! 1. Mark `Processing` and persist, so listings reflect in-flight work
//! 2. Run the engine on the blocking pool
//! 3. Write `Completed` or `Failed` in a single save

use crate::queue::{JobHandler, JobQueue, QueueError};
use crate::recording::artifacts::ArtifactStore;
use crate::recording::model::{Recording, RecordingId, RecordingStatus};
use crate::recording::store::{RecordingStore, StoreError};
use crate::transcription::Transcriber;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Failure reason recorded for jobs that were mid-flight when the service died.
pub const INTERRUPTED_REASON: &str = "interrupted by service restart";

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to store audio: {0}")]
    Artifact(#[source] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub failed: usize,
    pub requeued: usize,
}

pub struct RecordingService {
    store: Arc<dyn RecordingStore>,
    artifacts: Arc<ArtifactStore>,
    queue: Arc<JobQueue<Recording>>,
}

impl RecordingService {
    pub fn new(
        store: Arc<dyn RecordingStore>,
        artifacts: Arc<ArtifactStore>,
        queue: Arc<JobQueue<Recording>>,
    ) -> Self {
        Self {
            store,
            artifacts,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue<Recording>> {
        &self.queue
    }

    /// Store the uploaded audio under a fresh id and submit a job for it.
    ///
    /// When no record could be persisted the audio is removed again. A record
    /// rejected by a full queue is kept as `Failed`, and so is its audio.
    pub async fn create(&self, owner: &str, audio: &[u8]) -> Result<Recording, SubmitError> {
        let recording = Recording::new(owner);
        let id = recording.id();

        let submitted = match self.artifacts.write(&id, audio).await {
            Ok(_) => self.submit(recording.clone()).await,
            Err(e) => Err(SubmitError::Artifact(e)),
        };

        if let Err(e) = submitted {
            if !matches!(e, SubmitError::Queue(_)) {
                if let Err(cleanup) = self.artifacts.remove(&id).await {
                    warn!(recording_id = %id, error = %cleanup, "Failed to remove orphaned audio");
                }
            }
            return Err(e);
        }
        Ok(recording)
    }

    /// Persist a `Queued` recording, then enqueue it.
    ///
    /// If persistence fails the job is never enqueued. If the queue is full the
    /// record is closed out as `Failed` so it does not linger as `Queued`.
    pub async fn submit(&self, recording: Recording) -> Result<(), SubmitError> {
        self.store.save(&recording).await?;

        let id = recording.id();
        let mut rejected = recording.clone();
        match self.queue.put(recording) {
            Ok(pending) => {
                info!(recording_id = %id, pending, "Recording queued for transcription");
                Ok(())
            }
            Err(e) => {
                warn!(recording_id = %id, error = %e, "Rejected recording");
                if rejected.fail(e.to_string()).is_ok() {
                    if let Err(save_err) = self.store.save(&rejected).await {
                        error!(recording_id = %id, error = %save_err, "Failed to record rejection");
                    }
                }
                Err(e.into())
            }
        }
    }

    /// The owner's recordings, newest first.
    pub async fn list(&self, owner: &str) -> Result<Vec<Recording>, StoreError> {
        self.store.find_all_by_owner(owner).await
    }

    /// Look up a recording, hiding other owners' recordings.
    pub async fn find_for_owner(
        &self,
        owner: &str,
        id: &RecordingId,
    ) -> Result<Option<Recording>, StoreError> {
        Ok(self
            .store
            .find_by_id(id)
            .await?
            .filter(|r| r.owner() == owner))
    }

    pub async fn read_audio(&self, id: &RecordingId) -> std::io::Result<Vec<u8>> {
        self.artifacts.read(id).await
    }

    /// Repair state left behind by a previous process.
    ///
    /// `Processing` records can never finish, so they are failed. `Queued`
    /// records were persisted but never processed, so they are re-enqueued in
    /// creation order.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();

        for mut orphan in self.store.find_by_status(RecordingStatus::Processing).await? {
            if orphan.fail(INTERRUPTED_REASON).is_ok() {
                self.store.save(&orphan).await?;
                report.failed += 1;
            }
        }

        // Already accepted once, so the submission cap does not apply.
        for pending in self.store.find_by_status(RecordingStatus::Queued).await? {
            self.queue.requeue(pending);
            report.requeued += 1;
        }

        info!(
            failed = report.failed,
            requeued = report.requeued,
            "Reconciled recordings from previous run"
        );
        Ok(report)
    }
}

/// The queue's processing function for recordings.
pub struct TranscriptionJobHandler {
    store: Arc<dyn RecordingStore>,
    artifacts: Arc<ArtifactStore>,
    engine: Arc<dyn Transcriber>,
}

impl TranscriptionJobHandler {
    pub fn new(
        store: Arc<dyn RecordingStore>,
        artifacts: Arc<ArtifactStore>,
        engine: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            store,
            artifacts,
            engine,
        }
    }

    async fn run_engine(&self, id: &RecordingId) -> Result<String, String> {
        let engine = Arc::clone(&self.engine);
        let audio = self.artifacts.path_for(id);

        match tokio::task::spawn_blocking(move || engine.transcribe(&audio)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(e) => Err(describe_join_error(e)),
        }
    }
}

#[async_trait]
impl JobHandler<Recording> for TranscriptionJobHandler {
    async fn handle(&self, mut recording: Recording) {
        let id = recording.id();

        if let Err(e) = recording.begin_processing() {
            warn!(recording_id = %id, error = %e, "Skipping recording that is not queued");
            return;
        }
        if let Err(e) = self.store.save(&recording).await {
            warn!(recording_id = %id, error = %e, "Failed to persist processing state");
        }

        info!(recording_id = %id, "Transcribing recording");
        let outcome = self.run_engine(&id).await;
        if let Err(reason) = &outcome {
            warn!(recording_id = %id, reason = %reason, "Transcription failed");
        }

        if let Err(e) = recording.finish(outcome) {
            error!(recording_id = %id, error = %e, "Invalid terminal transition");
            return;
        }

        match self.store.save(&recording).await {
            Ok(()) => info!(
                recording_id = %id,
                status = %recording.status(),
                "Recording finished"
            ),
            Err(e) => error!(
                recording_id = %id,
                status = %recording.status(),
                error = %e,
                "Terminal write failed; recording remains in processing state"
            ),
        }
    }
}

fn describe_join_error(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("transcription engine panicked: {detail}")
        }
        Err(e) => format!("transcription engine task failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::store::MemoryRecordingStore;
    use anyhow::anyhow;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct Harness {
        service: RecordingService,
        store: Arc<MemoryRecordingStore>,
        _dir: tempfile::TempDir,
    }

    async fn harness(engine: Arc<dyn Transcriber>) -> Harness {
        capped_harness(engine, None).await
    }

    async fn capped_harness(engine: Arc<dyn Transcriber>, capacity: Option<usize>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryRecordingStore::new());
        let artifacts = Arc::new(ArtifactStore::open(dir.path()).await.unwrap());
        let handler = TranscriptionJobHandler::new(store.clone(), artifacts.clone(), engine);
        let queue = Arc::new(JobQueue::with_capacity(Arc::new(handler), capacity));
        Harness {
            service: RecordingService::new(store.clone(), artifacts, queue),
            store,
            _dir: dir,
        }
    }

    /// Engine that echoes the audio file contents back as the transcript.
    fn echo_engine() -> Arc<dyn Transcriber> {
        Arc::new(|path: &Path| -> anyhow::Result<String> {
            Ok(std::fs::read_to_string(path)?)
        })
    }

    fn assert_exactly_one_result(recording: &Recording) {
        assert!(matches!(
            recording.status(),
            RecordingStatus::Completed | RecordingStatus::Failed
        ));
        let has_text = recording.transcript().is_some_and(|t| !t.is_empty());
        let has_reason = recording.failure_reason().is_some_and(|r| !r.is_empty());
        assert!(has_text ^ has_reason, "{recording:?}");
    }

    #[tokio::test]
    async fn completed_jobs_list_newest_first() {
        let h = harness(echo_engine()).await;
        h.service.queue().start();

        let mut ids = Vec::new();
        for clip in ["A", "B", "C"] {
            ids.push(h.service.create("alice", clip.as_bytes()).await.unwrap().id());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        h.service.queue().wait_idle().await;

        let listed = h.service.list("alice").await.unwrap();
        assert_eq!(
            listed.iter().map(Recording::id).collect::<Vec<_>>(),
            ids.iter().rev().copied().collect::<Vec<_>>()
        );
        for recording in &listed {
            assert_eq!(recording.status(), RecordingStatus::Completed);
            assert_exactly_one_result(recording);
        }
        assert_eq!(listed[0].transcript(), Some("C"));
        assert!(h.service.list("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_error_becomes_failure_reason() {
        let engine: Arc<dyn Transcriber> = Arc::new(|_: &Path| -> anyhow::Result<String> { Err(anyhow!("bad audio")) });
        let h = harness(engine).await;
        h.service.queue().start();

        let recording = h.service.create("dave", b"noise").await.unwrap();
        h.service.queue().wait_idle().await;

        let stored = h.store.find_by_id(&recording.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordingStatus::Failed);
        assert_eq!(stored.failure_reason(), Some("bad audio"));
        assert!(stored.transcript().is_none());
    }

    #[tokio::test]
    async fn engine_panic_becomes_failure_and_worker_survives() {
        let engine: Arc<dyn Transcriber> = Arc::new(|path: &Path| -> anyhow::Result<String> {
            let audio = std::fs::read_to_string(path)?;
            if audio == "boom" {
                panic!("decoder exploded");
            }
            Ok(audio)
        });
        let h = harness(engine).await;
        h.service.queue().start();

        let bad = h.service.create("erin", b"boom").await.unwrap();
        let good = h.service.create("erin", b"fine").await.unwrap();
        h.service.queue().wait_idle().await;

        let bad = h.store.find_by_id(&bad.id()).await.unwrap().unwrap();
        assert_eq!(bad.status(), RecordingStatus::Failed);
        assert!(bad.failure_reason().unwrap().contains("decoder exploded"));

        let good = h.store.find_by_id(&good.id()).await.unwrap().unwrap();
        assert_eq!(good.transcript(), Some("fine"));
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_job() {
        let engine: Arc<dyn Transcriber> = Arc::new(|path: &Path| -> anyhow::Result<String> {
            std::thread::sleep(Duration::from_millis(100));
            Ok(std::fs::read_to_string(path)?)
        });
        let h = harness(engine).await;
        h.service.queue().start();

        let recording = h.service.create("eve", b"slow clip").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mid_flight = h.store.find_by_id(&recording.id()).await.unwrap().unwrap();
        assert_eq!(mid_flight.status(), RecordingStatus::Processing);

        h.service.queue().stop().await.unwrap();

        let stored = h.store.find_by_id(&recording.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordingStatus::Completed);
        assert_exactly_one_result(&stored);
    }

    #[tokio::test]
    async fn stop_drains_every_submitted_job() {
        let engine: Arc<dyn Transcriber> = Arc::new(|path: &Path| -> anyhow::Result<String> {
            std::thread::sleep(Duration::from_millis(10));
            Ok(std::fs::read_to_string(path)?)
        });
        let h = harness(engine).await;
        h.service.queue().start();

        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(h.service.create("frank", format!("clip {i}").as_bytes()).await.unwrap().id());
        }
        h.service.queue().stop().await.unwrap();

        for id in ids {
            let stored = h.store.find_by_id(&id).await.unwrap().unwrap();
            assert_exactly_one_result(&stored);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn engine_calls_never_overlap() {
        let busy = Arc::new(AtomicBool::new(false));
        let spans = Arc::new(Mutex::new(Vec::<(Instant, Instant)>::new()));
        let engine: Arc<dyn Transcriber> = {
            let busy = busy.clone();
            let spans = spans.clone();
            Arc::new(move |_: &Path| -> anyhow::Result<String> {
                assert!(!busy.swap(true, Ordering::SeqCst), "engine re-entered");
                let enter = Instant::now();
                std::thread::sleep(Duration::from_millis(3));
                spans.lock().unwrap().push((enter, Instant::now()));
                busy.store(false, Ordering::SeqCst);
                Ok("ok".to_string())
            })
        };
        let h = Arc::new(harness(engine).await);
        h.service.queue().start();

        let mut submitters = Vec::new();
        for i in 0..8 {
            let h = h.clone();
            submitters.push(tokio::spawn(async move {
                h.service.create("gina", format!("{i}").as_bytes()).await.unwrap();
            }));
        }
        for submitter in submitters {
            submitter.await.unwrap();
        }
        h.service.queue().stop().await.unwrap();

        let mut spans = spans.lock().unwrap().clone();
        assert_eq!(spans.len(), 8);
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlapping engine calls");
        }
        assert_eq!(h.service.queue().snapshot().panicked, 0);
    }

    /// Store whose writes can be switched off to simulate an outage.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryRecordingStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl RecordingStore for FlakyStore {
        async fn save(&self, recording: &Recording) -> Result<(), StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(recording).await
        }

        async fn find_by_id(&self, id: &RecordingId) -> Result<Option<Recording>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_all_by_owner(&self, owner: &str) -> Result<Vec<Recording>, StoreError> {
            self.inner.find_all_by_owner(owner).await
        }

        async fn find_by_status(
            &self,
            status: RecordingStatus,
        ) -> Result<Vec<Recording>, StoreError> {
            self.inner.find_by_status(status).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_keeps_job_out_of_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::default());
        store.broken.store(true, Ordering::SeqCst);
        let artifacts = Arc::new(ArtifactStore::open(dir.path()).await.unwrap());
        let handler = TranscriptionJobHandler::new(store.clone(), artifacts.clone(), echo_engine());
        let queue = Arc::new(JobQueue::new(Arc::new(handler)));
        let service = RecordingService::new(store.clone(), artifacts, queue.clone());

        let err = service.submit(Recording::new("hank")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Store(_)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn unpersisted_upload_leaves_no_audio_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::default());
        store.broken.store(true, Ordering::SeqCst);
        let artifacts = Arc::new(ArtifactStore::open(dir.path()).await.unwrap());
        let handler = TranscriptionJobHandler::new(store.clone(), artifacts.clone(), echo_engine());
        let queue = Arc::new(JobQueue::new(Arc::new(handler)));
        let service = RecordingService::new(store.clone(), artifacts, queue.clone());

        let err = service.create("hank", b"orphan").await.unwrap_err();
        assert!(matches!(err, SubmitError::Store(_)));
        assert!(queue.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn full_queue_rejects_and_fails_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryRecordingStore::new());
        let artifacts = Arc::new(ArtifactStore::open(dir.path()).await.unwrap());
        let handler = TranscriptionJobHandler::new(store.clone(), artifacts.clone(), echo_engine());
        let queue = Arc::new(JobQueue::with_capacity(Arc::new(handler), Some(1)));
        let service = RecordingService::new(store.clone(), artifacts, queue);

        service.create("ivy", b"one").await.unwrap();
        let err = service.create("ivy", b"two").await.unwrap_err();
        assert!(matches!(err, SubmitError::Queue(QueueError::Full { capacity: 1 })));

        let failed = store.find_by_status(RecordingStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_exactly_one_result(&failed[0]);
        // The rejected record still points at its audio.
        assert_eq!(service.read_audio(&failed[0].id()).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn reconcile_fails_orphans_and_requeues_backlog() {
        let h = harness(echo_engine()).await;

        let mut orphan = Recording::new("jay");
        orphan.begin_processing().unwrap();
        h.store.save(&orphan).await.unwrap();

        let backlog = Recording::new("jay");
        h.service.artifacts.write(&backlog.id(), b"left over").await.unwrap();
        h.store.save(&backlog).await.unwrap();

        let report = h.service.reconcile().await.unwrap();
        assert_eq!(report, ReconcileReport { failed: 1, requeued: 1 });

        h.service.queue().start();
        h.service.queue().wait_idle().await;

        let orphan = h.store.find_by_id(&orphan.id()).await.unwrap().unwrap();
        assert_eq!(orphan.failure_reason(), Some(INTERRUPTED_REASON));
        let backlog = h.store.find_by_id(&backlog.id()).await.unwrap().unwrap();
        assert_eq!(backlog.transcript(), Some("left over"));
    }

    #[tokio::test]
    async fn reconcile_requeues_backlog_larger_than_the_cap() {
        let h = capped_harness(echo_engine(), Some(2)).await;

        let mut backlog = Vec::new();
        for i in 0..5 {
            let recording = Recording::new("kay");
            h.service
                .artifacts
                .write(&recording.id(), format!("clip {i}").as_bytes())
                .await
                .unwrap();
            h.store.save(&recording).await.unwrap();
            backlog.push(recording.id());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        h.service.queue().start();
        let report = h.service.reconcile().await.unwrap();
        assert_eq!(report, ReconcileReport { failed: 0, requeued: 5 });
        h.service.queue().stop().await.unwrap();

        assert!(h.store.find_by_status(RecordingStatus::Queued).await.unwrap().is_empty());
        for (i, id) in backlog.iter().enumerate() {
            let stored = h.store.find_by_id(id).await.unwrap().unwrap();
            assert_eq!(stored.transcript(), Some(format!("clip {i}").as_str()));
        }
    }

    #[tokio::test]
    async fn find_for_owner_hides_other_owners() {
        let h = harness(echo_engine()).await;
        let recording = h.service.create("kim", b"mine").await.unwrap();

        assert!(h.service.find_for_owner("kim", &recording.id()).await.unwrap().is_some());
        assert!(h.service.find_for_owner("lee", &recording.id()).await.unwrap().is_none());
        assert_eq!(h.service.read_audio(&recording.id()).await.unwrap(), b"mine");
    }
}
