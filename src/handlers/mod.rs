pub mod jobs;
pub mod upload;

pub use jobs::*;
pub use upload::*;

use actix_web::web;

/// Wire the full `/api` surface onto a service config. Shared between the
/// server binary and handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(crate::health::health_check))
            .route("/metrics", web::get().to(crate::health::detailed_metrics))
            .route("/upload", web::post().to(upload::upload_file))
            .route("/process", web::post().to(jobs::start_processing))
            .route("/status/{job_id}", web::get().to(jobs::get_status))
            .route("/cancel/{job_id}", web::post().to(jobs::cancel_job))
            .route("/download/{job_id}", web::get().to(jobs::download_result)),
    );
}
