//! # Job Handlers
//!
//! The job lifecycle API: start processing, query status, cancel, and
//! download the finished subtitle file.
//!
//! Status lookups for unknown ids answer 404 with the standard error
//! body. That response is a first-class protocol signal: after a server
//! restart every previously issued job id answers exactly the same way,
//! and clients treat it as "start over", not as a fault.

use crate::jobs::{worker, JobConfig, JobStatus};
use crate::pipeline::{Language, ModelKind};
use crate::subtitle::SubtitleMode;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Request body for `POST /api/process`.
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    /// Id returned by the upload endpoint
    pub file_id: String,
    /// Model selector; server default when omitted
    pub model: Option<String>,
    /// Language hint; auto-detect when omitted
    pub language: Option<String>,
    /// Subtitle chunking mode; server default when omitted
    pub mode: Option<String>,
}

/// Handle `POST /api/process`: validate the configuration, create the job,
/// and spawn its worker.
///
/// Validation happens before anything is created — a rejected request
/// leaves no job behind and issues no job id.
pub async fn start_processing(
    state: web::Data<AppState>,
    request: web::Json<ProcessRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    let defaults = state.get_config().models;

    let model: ModelKind = request
        .model
        .as_deref()
        .unwrap_or(&defaults.default_model)
        .parse()
        .map_err(|e| AppError::ValidationError(format!("Invalid model: {}", e)))?;

    let language: Option<Language> = match request.language.as_deref() {
        None | Some("") => None,
        Some(code) => Some(
            code.parse()
                .map_err(|e| AppError::ValidationError(format!("Invalid language: {}", e)))?,
        ),
    };

    let mode: SubtitleMode = request
        .mode
        .as_deref()
        .unwrap_or(&defaults.default_mode)
        .parse()
        .map_err(|e| AppError::ValidationError(format!("Invalid mode: {}", e)))?;

    if state.storage.find_upload(&request.file_id).is_none() {
        return Err(AppError::NotFound("File not found".to_string()));
    }

    let job = state.jobs.create(
        request.file_id,
        JobConfig {
            model,
            language,
            mode,
        },
    );

    info!(job_id = %job.id, model = %model, mode = %mode, "Job created");

    worker::spawn(
        state.jobs.clone(),
        state.storage.clone(),
        state.worker_permits.clone(),
        state.engine.clone(),
        job.id,
    );

    Ok(HttpResponse::Ok().json(json!({ "job_id": job.id })))
}

/// Handle `GET /api/status/{job_id}`: current job snapshot.
pub async fn get_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let job = parse_job_id(&path)
        .and_then(|id| state.jobs.get(id))
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    Ok(HttpResponse::Ok().json(job))
}

/// Handle `POST /api/cancel/{job_id}`: stop a pending or running job.
pub async fn cancel_job(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let job = parse_job_id(&path)
        .and_then(|id| state.jobs.cancel(id))
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    let message = if job.status == JobStatus::Cancelled {
        "Job cancelled successfully".to_string()
    } else {
        format!("Job already {}", job.status)
    };

    Ok(HttpResponse::Ok().json(json!({ "message": message })))
}

/// Handle `GET /api/download/{job_id}`: the finished SRT file.
pub async fn download_result(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let job = parse_job_id(&path)
        .and_then(|id| state.jobs.get(id))
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    if job.status != JobStatus::Completed {
        return Err(AppError::BadRequest("Job not completed yet".to_string()));
    }

    let output_file = job
        .output_file
        .ok_or_else(|| AppError::NotFound("Output file not found".to_string()))?;
    let bytes = tokio::fs::read(&output_file)
        .await
        .map_err(|_| AppError::NotFound("Output file not found".to_string()))?;

    Ok(HttpResponse::Ok()
        .content_type("application/x-subrip")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"subtitles_{}.srt\"", job.config.mode),
        ))
        .body(bytes))
}

/// A malformed id is handled exactly like an unknown one: not-found is the
/// single signal for "this job does not exist here".
fn parse_job_id(raw: &str) -> Option<Uuid> {
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::handlers;
    use crate::pipeline::{
        ProgressObserver, TranscribeRequest, Transcript, TranscriptSegment, TranscriptionEngine,
        WordSpan,
    };
    use crate::state::AppState;
    use crate::storage::Storage;
    use actix_web::{test, web, App};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    /// Instant engine producing a fixed two-word transcript.
    struct InstantEngine;

    impl TranscriptionEngine for InstantEngine {
        fn transcribe(
            &self,
            _input: &Path,
            _request: &TranscribeRequest,
            _observer: &dyn ProgressObserver,
        ) -> anyhow::Result<Transcript> {
            Ok(Transcript {
                segments: vec![TranscriptSegment {
                    text: "hello world".to_string(),
                    start: 0.0,
                    end: 1.0,
                    words: vec![
                        WordSpan {
                            text: "hello".to_string(),
                            start: 0.0,
                            end: 0.5,
                        },
                        WordSpan {
                            text: "world".to_string(),
                            start: 0.5,
                            end: 1.0,
                        },
                    ],
                }],
            })
        }
    }

    fn test_state(dir: &Path, max_concurrent_jobs: usize) -> AppState {
        let mut config = AppConfig::default();
        config.storage.upload_dir = dir.join("uploads").to_string_lossy().into_owned();
        config.storage.output_dir = dir.join("outputs").to_string_lossy().into_owned();
        config.limits.max_concurrent_jobs = max_concurrent_jobs;
        let storage = Storage::new(&config.storage).unwrap();
        AppState::new(config, storage, Arc::new(InstantEngine))
    }

    async fn wait_for_terminal(state: &AppState, id: Uuid) -> JobStatus {
        for _ in 0..100 {
            let job = state.jobs.get(id).unwrap();
            if job.status.is_terminal() {
                return job.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[actix_web::test]
    async fn test_unknown_model_rejected_before_job_creation() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 1);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/process")
            .set_json(serde_json::json!({ "file_id": "whatever", "model": "gigantic" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400);
        assert_eq!(state.jobs.counts().total, 0);
    }

    #[actix_web::test]
    async fn test_unknown_file_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 1);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/process")
            .set_json(serde_json::json!({ "file_id": "missing", "model": "base" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 404);
        assert_eq!(state.jobs.counts().total, 0);
    }

    #[actix_web::test]
    async fn test_status_for_unknown_and_malformed_ids_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 1);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(handlers::configure),
        )
        .await;

        for uri in [
            format!("/api/status/{}", Uuid::new_v4()),
            "/api/status/not-a-uuid".to_string(),
        ] {
            let req = test::TestRequest::get().uri(&uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 404);

            let body: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(body["error"]["type"], "not_found");
        }
    }

    #[actix_web::test]
    async fn test_process_poll_download_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 1);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure),
        )
        .await;

        let file_id = state.storage.save_upload("in.wav", b"pcm").await.unwrap();

        let req = test::TestRequest::post()
            .uri("/api/process")
            .set_json(serde_json::json!({ "file_id": file_id, "model": "base", "mode": "oneword" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();

        assert_eq!(wait_for_terminal(&state, job_id).await, JobStatus::Completed);

        let req = test::TestRequest::get()
            .uri(&format!("/api/status/{}", job_id))
            .to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(status["progress"], 100.0);

        let req = test::TestRequest::get()
            .uri(&format!("/api/download/{}", job_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/x-subrip"
        );
        let srt = test::read_body(resp).await;
        assert!(std::str::from_utf8(&srt).unwrap().contains("hello"));
    }

    #[actix_web::test]
    async fn test_download_before_completion_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // Zero worker slots: the job stays pending
        let state = test_state(dir.path(), 0);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure),
        )
        .await;

        let file_id = state.storage.save_upload("in.wav", b"pcm").await.unwrap();
        let req = test::TestRequest::post()
            .uri("/api/process")
            .set_json(serde_json::json!({ "file_id": file_id }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let job_id = body["job_id"].as_str().unwrap();

        let req = test::TestRequest::get()
            .uri(&format!("/api/download/{}", job_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_cancel_queued_job() {
        let dir = tempfile::tempdir().unwrap();
        // Zero worker slots: the job parks in the admission queue
        let state = test_state(dir.path(), 0);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure),
        )
        .await;

        let file_id = state.storage.save_upload("in.wav", b"pcm").await.unwrap();
        let req = test::TestRequest::post()
            .uri("/api/process")
            .set_json(serde_json::json!({ "file_id": file_id }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();

        let req = test::TestRequest::post()
            .uri(&format!("/api/cancel/{}", job_id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], "Job cancelled successfully");
        assert_eq!(state.jobs.get(job_id).unwrap().status, JobStatus::Cancelled);

        // Cancelling again stays terminal and reports the state
        let req = test::TestRequest::post()
            .uri(&format!("/api/cancel/{}", job_id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], "Job cancelled successfully");
    }
}
