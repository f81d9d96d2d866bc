use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Point-in-time view of the transcription queue.
pub async fn queue_status(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.recordings.queue().snapshot();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "queue": snapshot
    }))
}

pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "message": "pong" }))
}
