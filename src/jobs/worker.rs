//! # Worker Task
//!
//! One tokio task per job: waits for an admission permit, drives the
//! transcription pipeline on a blocking thread, and translates pipeline
//! milestones into store updates.
//!
//! Progress from the pipeline is coarse and uneven — nothing for minutes
//! while a model downloads, then a burst of chunk events. The worker
//! reports whatever real milestones it has; the client-side reconciler
//! smooths over the gaps.
//!
//! Cancellation is cooperative: the store flips the job to `cancelled` and
//! fires the job's token; the engine polls the token between chunks and
//! bails. Any write this worker attempts afterwards is dropped by the
//! store's terminal-state guard, so the race resolves itself.

use crate::jobs::{JobStatus, JobStore, JobUpdate};
use crate::pipeline::{PipelineEvent, ProgressObserver, TranscribeRequest, TranscriptionEngine};
use crate::storage::Storage;
use crate::subtitle;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Bridges pipeline milestones to store updates. Runs on the blocking
/// pipeline thread; the store is sync, so no channel is needed.
struct StoreObserver {
    store: JobStore,
    job_id: Uuid,
    token: CancellationToken,
}

impl ProgressObserver for StoreObserver {
    fn on_event(&self, event: PipelineEvent) {
        let (progress, message) = describe_event(&event);
        let mut update = JobUpdate::default().with_message(message);
        update.progress = progress;
        self.store.apply(self.job_id, update);
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Map a pipeline milestone to (progress, status message).
///
/// Model readiness and audio decode take the bar to 20; the chunk sweep
/// covers 20..95; serialization and completion own the rest.
fn describe_event(event: &PipelineEvent) -> (Option<f32>, String) {
    match event {
        PipelineEvent::ModelLoading { model } => (
            None,
            format!("Checking model {} files...", model),
        ),
        PipelineEvent::ModelReady => (Some(10.0), "Model ready, transcribing...".to_string()),
        PipelineEvent::AudioDecoded { duration_secs } => (
            Some(20.0),
            format!("Audio decoded ({:.1}s)", duration_secs),
        ),
        PipelineEvent::ChunkDecoded { index, total } => {
            let done = (index + 1) as f32 / (*total).max(1) as f32;
            (
                Some(20.0 + 75.0 * done),
                format!("Transcribing chunk {} of {}", index + 1, total),
            )
        }
    }
}

/// Spawn the worker task that drives `job_id` to a terminal state.
pub fn spawn(
    store: JobStore,
    storage: Arc<Storage>,
    permits: Arc<Semaphore>,
    engine: Arc<dyn TranscriptionEngine>,
    job_id: Uuid,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(token) = store.cancellation_token(job_id) else {
            debug!(job_id = %job_id, "Worker spawned for unknown job");
            return;
        };

        // Admission control: queued jobs stay pending until a slot frees.
        let permit = if let Ok(permit) = permits.clone().try_acquire_owned() {
            permit
        } else {
            store.apply(
                job_id,
                JobUpdate::default().with_message("Waiting for a free transcription slot..."),
            );
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(job_id = %job_id, "Job cancelled while queued");
                    return;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return, // semaphore closed: shutting down
                },
            }
        };

        run_job(&store, &storage, engine, job_id, token).await;
        drop(permit);
    })
}

async fn run_job(
    store: &JobStore,
    storage: &Storage,
    engine: Arc<dyn TranscriptionEngine>,
    job_id: Uuid,
    token: CancellationToken,
) {
    let Some(job) = store.get(job_id) else {
        return;
    };
    if job.status.is_terminal() {
        return;
    }

    if !store.apply(
        job_id,
        JobUpdate::status(JobStatus::Processing)
            .with_progress(0.0)
            .with_message("Starting transcription..."),
    ) {
        return;
    }

    let Some(input_path) = storage.find_upload(&job.file_id) else {
        store.apply(
            job_id,
            JobUpdate::status(JobStatus::Failed)
                .with_error(format!("Input file {} not found", job.file_id)),
        );
        return;
    };

    let output_path = storage.output_path(job_id);
    let request = TranscribeRequest {
        model: job.config.model,
        language: job.config.language,
    };
    let mode = job.config.mode;

    let observer = StoreObserver {
        store: store.clone(),
        job_id,
        token,
    };
    let store_for_pipeline = store.clone();
    let pipeline_output = output_path.clone();

    let result = tokio::task::spawn_blocking(move || {
        let transcript = engine.transcribe(&input_path, &request, &observer)?;

        store_for_pipeline.apply(
            job_id,
            JobUpdate::progress(95.0).with_message("Writing subtitles..."),
        );
        subtitle::write_srt_file(&pipeline_output, &transcript, mode)?;
        Ok::<_, anyhow::Error>(transcript)
    })
    .await;

    match result {
        Ok(Ok(transcript)) => {
            info!(
                job_id = %job_id,
                segments = transcript.segments.len(),
                "Job completed"
            );
            store.apply(
                job_id,
                JobUpdate::status(JobStatus::Completed)
                    .with_message("Done! Subtitles ready to download.")
                    .with_output_file(output_path),
            );
        }
        Ok(Err(e)) => {
            // If the job was cancelled mid-run this write is dropped by
            // the terminal-state guard and the job stays cancelled.
            error!(job_id = %job_id, error = %e, "Job failed");
            store.apply(
                job_id,
                JobUpdate::status(JobStatus::Failed).with_error(e.to_string()),
            );
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Worker panicked");
            store.apply(
                job_id,
                JobUpdate::status(JobStatus::Failed)
                    .with_error(format!("Worker task failed: {}", e)),
            );
        }
    }
}
