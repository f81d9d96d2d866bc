use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Configuration as loaded at startup. Engine args are shown unsubstituted.
pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port,
                "allowed_origins": config.server.allowed_origins
            },
            "storage": {
                "recordings_dir": config.storage.recordings_dir,
                "database_dir": config.storage.database_dir,
                "max_upload_bytes": config.storage.max_upload_bytes
            },
            "queue": {
                "max_pending": config.queue.max_pending,
                "reconcile_on_startup": config.queue.reconcile_on_startup
            },
            "transcription": {
                "command": config.transcription.command,
                "args": config.transcription.args,
                "model": config.transcription.model
            }
        }
    }))
}
