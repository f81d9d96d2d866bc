pub mod config;
pub mod owner;
pub mod queue;
pub mod recordings;

pub use config::*;
pub use queue::*;
pub use recordings::*;

use crate::health;
use actix_web::web;

/// Mount every API route. Shared by `main` and the handler tests.
///
/// - `/api`: the recording surface the web UI talks to
/// - `/api/v1`: operational endpoints (queue, health, metrics, config)
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/queue", web::get().to(queue_status))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config)),
    )
    .service(
        web::scope("/api")
            .route("/ping", web::get().to(ping))
            .service(
                web::resource(["/recording", "/recording/"])
                    .route(web::get().to(list_recordings))
                    .route(web::post().to(create_recording)),
            )
            .route("/recording/{id}", web::get().to(recording_audio))
            .route("/recording/{id}/status", web::get().to(recording_status)),
    );
}
