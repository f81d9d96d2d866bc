//! # Recording REST API Handlers
//!
//! ## Endpoints:
//! - `POST /api/recording` - upload audio (multipart field `recording`), returns 202
//! - `GET /api/recording` - the caller's recordings, newest first
//! - `GET /api/recording/{id}` - the stored audio bytes
//! - `GET /api/recording/{id}/status` - one recording's lifecycle state
//!
//! Both `/recording` and `/recording/` are routed, since existing clients use
//! the trailing slash.
//!
//! Every endpoint is scoped to the [`Owner`] on the request. Other owners'
//! recordings answer 404, not 403, so ids cannot be enumerated.

use crate::error::{AppError, AppResult};
use crate::handlers::owner::Owner;
use crate::recording::{Recording, RecordingId};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::io::ErrorKind;

const RECORDING_FIELD: &str = "recording";

/// Wire shape of a recording as the web UI consumes it. The owner is implied
/// by the request; text fields are `""` rather than `null` when unset.
#[derive(Debug, Serialize)]
pub struct RecordingView {
    pub status: String,
    pub recording_id: String,
    /// RFC 3339 creation time
    pub date: String,
    pub transcription: String,
    pub fail_reason: String,
}

impl From<&Recording> for RecordingView {
    fn from(recording: &Recording) -> Self {
        Self {
            status: recording.status().to_string(),
            recording_id: recording.id().to_string(),
            date: recording.created_at().to_rfc3339(),
            transcription: recording.transcript().unwrap_or_default().to_string(),
            fail_reason: recording.failure_reason().unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: &'static str,
    #[serde(flatten)]
    recording: RecordingView,
}

/// Accept an upload and queue it for transcription without waiting on it.
pub async fn create_recording(
    state: web::Data<AppState>,
    owner: Owner,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let limit = state.config.storage.max_upload_bytes;
    let audio = read_recording_field(&mut payload, limit).await?;
    if audio.is_empty() {
        return Err(AppError::BadRequest("Recording is empty".to_string()));
    }

    let recording = state.recordings.create(owner.as_str(), &audio).await?;
    tracing::info!(
        recording_id = %recording.id(),
        owner = owner.as_str(),
        bytes = audio.len(),
        "Accepted recording"
    );

    Ok(HttpResponse::Accepted().json(UploadResponse {
        message: "added file successfully",
        recording: RecordingView::from(&recording),
    }))
}

pub async fn list_recordings(state: web::Data<AppState>, owner: Owner) -> AppResult<HttpResponse> {
    let recordings = state.recordings.list(owner.as_str()).await?;
    let views: Vec<RecordingView> = recordings.iter().map(RecordingView::from).collect();

    Ok(HttpResponse::Ok().json(json!({ "recordings": views })))
}

pub async fn recording_status(
    state: web::Data<AppState>,
    owner: Owner,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let recording = find_owned(&state, &owner, &path).await?;
    Ok(HttpResponse::Ok().json(RecordingView::from(&recording)))
}

pub async fn recording_audio(
    state: web::Data<AppState>,
    owner: Owner,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let recording = find_owned(&state, &owner, &path).await?;
    let audio = match state.recordings.read_audio(&recording.id()).await {
        Ok(audio) => audio,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(recording_id = %recording.id(), "Recording has no audio on disk");
            return Err(AppError::NotFound(format!(
                "Audio for recording {} not found",
                recording.id()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(audio))
}

async fn find_owned(state: &AppState, owner: &Owner, raw_id: &str) -> AppResult<Recording> {
    let not_found = || AppError::NotFound(format!("Recording {} not found", raw_id));
    let id: RecordingId = raw_id.parse().map_err(|_| not_found())?;

    state
        .recordings
        .find_for_owner(owner.as_str(), &id)
        .await?
        .ok_or_else(not_found)
}

/// Pull the `recording` file field out of the form, enforcing `limit` bytes.
async fn read_recording_field(payload: &mut Multipart, limit: usize) -> AppResult<Vec<u8>> {
    while let Some(field) = payload.next().await {
        let mut field = field?;
        if field.name() != Some(RECORDING_FIELD) {
            continue;
        }

        let mut audio = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if audio.len() + chunk.len() > limit {
                return Err(AppError::BadRequest(format!(
                    "Recording exceeds the {} byte upload limit",
                    limit
                )));
            }
            audio.extend_from_slice(&chunk);
        }
        return Ok(audio);
    }

    Err(AppError::BadRequest(format!(
        "Missing `{}` file field",
        RECORDING_FIELD
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::owner::OWNER_HEADER;
    use crate::recording::model::RecordingStatus;
    use crate::state::testing::echo_state;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::time::Duration;

    const BOUNDARY: &str = "----voxtestboundary";

    fn multipart_body(field: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"clip.webm\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(owner: &str, field: &str, content: &[u8]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/recording")
            .insert_header((OWNER_HEADER, owner))
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(multipart_body(field, content))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(crate::handlers::configure_api),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn upload_is_accepted_and_transcribed() {
        let dir = tempfile::tempdir().unwrap();
        let state = echo_state(dir.path()).await;
        state.recordings.queue().start();
        let app = app!(state);

        let resp = test::call_service(&app, upload("alice", "recording", b"hello there").to_request()).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "added file successfully");
        assert_eq!(body["status"], "queued");
        assert_eq!(body["transcription"], "");
        let id = body["recording_id"].as_str().unwrap().to_string();

        state.recordings.queue().wait_idle().await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/recording/{id}/status"))
            .insert_header((OWNER_HEADER, "alice"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["transcription"], "hello there");
        assert_eq!(body["fail_reason"], "");
        assert!(body["date"].as_str().unwrap().parse::<chrono::DateTime<chrono::Utc>>().is_ok());

        let req = test::TestRequest::get()
            .uri(&format!("/api/recording/{id}"))
            .insert_header((OWNER_HEADER, "alice"))
            .to_request();
        let audio = test::call_and_read_body(&app, req).await;
        assert_eq!(&audio[..], b"hello there");
    }

    #[actix_web::test]
    async fn listing_is_newest_first_and_owner_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let state = echo_state(dir.path()).await;
        state.recordings.queue().start();
        let app = app!(state);

        for clip in ["A", "B", "C"] {
            let resp = test::call_service(&app, upload("alice", "recording", clip.as_bytes()).to_request()).await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        test::call_service(&app, upload("bob", "recording", b"other").to_request()).await;
        state.recordings.queue().wait_idle().await;

        let req = test::TestRequest::get()
            .uri("/api/recording")
            .insert_header((OWNER_HEADER, "alice"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let recordings = body["recordings"].as_array().unwrap();

        let transcripts: Vec<&str> = recordings
            .iter()
            .map(|r| r["transcription"].as_str().unwrap())
            .collect();
        assert_eq!(transcripts, vec!["C", "B", "A"]);
        assert!(recordings
            .iter()
            .all(|r| r["status"] == RecordingStatus::Completed.as_str()));
    }

    #[actix_web::test]
    async fn missing_owner_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let state = echo_state(dir.path()).await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/recording").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn other_owners_recordings_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = echo_state(dir.path()).await;
        let app = app!(state);

        let resp = test::call_service(&app, upload("alice", "recording", b"secret").to_request()).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["recording_id"].as_str().unwrap().to_string();

        for uri in [format!("/api/recording/{id}"), format!("/api/recording/{id}/status")] {
            let req = test::TestRequest::get()
                .uri(&uri)
                .insert_header((OWNER_HEADER, "mallory"))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        }

        let req = test::TestRequest::get()
            .uri("/api/recording/not-a-uuid/status")
            .insert_header((OWNER_HEADER, "alice"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn upload_without_recording_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = echo_state(dir.path()).await;
        let app = app!(state);

        let resp = test::call_service(&app, upload("alice", "attachment", b"data").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(&app, upload("alice", "recording", b"").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.recordings.queue().is_empty());
    }

    #[actix_web::test]
    async fn trailing_slash_listing_matches() {
        let dir = tempfile::tempdir().unwrap();
        let state = echo_state(dir.path()).await;
        let app = app!(state);

        test::call_service(&app, upload("alice", "recording", b"pending").to_request()).await;

        let req = test::TestRequest::get()
            .uri("/api/recording/")
            .insert_header((OWNER_HEADER, "alice"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let recordings = body["recordings"].as_array().unwrap();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0]["status"], "queued");
        assert_eq!(recordings[0]["transcription"], "");
        assert_eq!(recordings[0]["fail_reason"], "");
    }

    #[actix_web::test]
    async fn missing_audio_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = echo_state(dir.path()).await;
        let app = app!(state);

        let resp = test::call_service(&app, upload("alice", "recording", b"gone soon").to_request()).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["recording_id"].as_str().unwrap().to_string();
        std::fs::remove_file(dir.path().join(&id)).unwrap();

        let req = test::TestRequest::get()
            .uri(&format!("/api/recording/{id}"))
            .insert_header((OWNER_HEADER, "alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
