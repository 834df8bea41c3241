//! # Polling Controller
//!
//! Owns the client side of the status protocol: one task, two timers. The
//! status poll (reference 1000 ms) asks the server where the job is; the
//! animation tick (reference 500 ms) advances the reconciler between
//! answers. Both live in a single `select!` loop, so every exit path —
//! terminal status, not-found, failure bound, external abort — tears both
//! down together, exactly once.
//!
//! ## Response handling:
//! - `pending`/`processing` → feed progress to the reconciler, keep going
//! - `completed` → force 100, short reveal delay, stop
//! - `failed`/`cancelled` → surface and stop
//! - not-found → "connection lost": the store no longer knows the id
//!   (restart and expiry look identical), the session must start over
//! - transport errors → swallowed and logged; only a run of
//!   `max_consecutive_failures` of them ends the loop ("unreachable")
//!
//! Queries are serialized: a slow response delays the next poll rather
//! than overlapping it, and the transport layer puts a timeout on each
//! request so a hung one cannot wedge the loop.

use crate::client::progress::ProgressReconciler;
use crate::jobs::JobStatus;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a status query yields, as far as the poller cares.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusSnapshot {
    pub status: JobStatus,
    pub progress: f32,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Failure modes of a single status query.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The server does not know the job id (never existed, expired, or
    /// the store was reset — indistinguishable by design)
    #[error("job not found")]
    NotFound,

    /// The query itself failed (timeout, connection refused, bad gateway)
    #[error("transport error: {0}")]
    Transport(String),
}

/// Anything that can answer "where is this job?". The production
/// implementation is [`ApiClient`](crate::client::ApiClient); tests use
/// scripted sources.
pub trait StatusSource: Send + Sync {
    fn fetch(&self, job_id: Uuid) -> BoxFuture<'_, Result<StatusSnapshot, PollError>>;
}

/// Events pushed to the display while the controller runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    Progress {
        displayed: f32,
        status: JobStatus,
        message: Option<String>,
    },
    Completed,
    Failed { error: String },
    Cancelled,
    /// Not-found from the server: reset everything and start over
    ConnectionLost,
    /// Too many consecutive transport failures: give up
    ServerUnreachable,
}

/// How the polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    Failed,
    Cancelled,
    ConnectionLost,
    ServerUnreachable,
    /// The caller aborted via the cancellation token
    Aborted,
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// How often the server is asked for status
    pub poll_interval: Duration,
    /// How often the animation advances between answers
    pub tick_interval: Duration,
    /// Consecutive transport failures tolerated before giving up
    pub max_consecutive_failures: u32,
    /// Pause between forcing 100% and revealing the download affordance
    pub reveal_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            tick_interval: Duration::from_millis(500),
            max_consecutive_failures: 30,
            reveal_delay: Duration::from_millis(800),
        }
    }
}

pub struct PollingController {
    config: PollConfig,
}

impl PollingController {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    /// Poll `job_id` until it reaches a terminal state or the protocol
    /// says to stop. Updates stream through `on_update`; the return value
    /// tells the caller which exit path fired.
    pub async fn run(
        &self,
        job_id: Uuid,
        source: &dyn StatusSource,
        abort: &CancellationToken,
        mut on_update: impl FnMut(PollUpdate),
    ) -> PollOutcome {
        let mut reconciler = ProgressReconciler::new();
        let mut last_status = JobStatus::Pending;
        let mut last_message: Option<String> = None;
        let mut consecutive_failures = 0u32;

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut anim = tokio::time::interval(self.config.tick_interval);
        anim.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = abort.cancelled() => {
                    debug!(job_id = %job_id, "Polling aborted by caller");
                    return PollOutcome::Aborted;
                }

                _ = anim.tick() => {
                    let displayed = reconciler.tick();
                    on_update(PollUpdate::Progress {
                        displayed,
                        status: last_status,
                        message: last_message.clone(),
                    });
                }

                _ = poll.tick() => {
                    match source.fetch(job_id).await {
                        Ok(snapshot) => {
                            consecutive_failures = 0;
                            match snapshot.status {
                                JobStatus::Pending | JobStatus::Processing => {
                                    last_status = snapshot.status;
                                    last_message = snapshot.status_message;
                                    let displayed = reconciler.observe(snapshot.progress);
                                    on_update(PollUpdate::Progress {
                                        displayed,
                                        status: last_status,
                                        message: last_message.clone(),
                                    });
                                }
                                JobStatus::Completed => {
                                    let displayed = reconciler.complete();
                                    on_update(PollUpdate::Progress {
                                        displayed,
                                        status: JobStatus::Completed,
                                        message: snapshot.status_message,
                                    });
                                    tokio::time::sleep(self.config.reveal_delay).await;
                                    on_update(PollUpdate::Completed);
                                    return PollOutcome::Completed;
                                }
                                JobStatus::Failed => {
                                    let error = snapshot
                                        .error
                                        .unwrap_or_else(|| "Processing failed".to_string());
                                    on_update(PollUpdate::Failed { error });
                                    return PollOutcome::Failed;
                                }
                                JobStatus::Cancelled => {
                                    on_update(PollUpdate::Cancelled);
                                    return PollOutcome::Cancelled;
                                }
                            }
                        }
                        Err(PollError::NotFound) => {
                            on_update(PollUpdate::ConnectionLost);
                            return PollOutcome::ConnectionLost;
                        }
                        Err(PollError::Transport(e)) => {
                            consecutive_failures += 1;
                            warn!(
                                job_id = %job_id,
                                failures = consecutive_failures,
                                error = %e,
                                "Status query failed"
                            );
                            if consecutive_failures >= self.config.max_consecutive_failures {
                                on_update(PollUpdate::ServerUnreachable);
                                return PollOutcome::ServerUnreachable;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a scripted sequence of responses; the last entry repeats
    /// if the poller asks again.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<StatusSnapshot, PollError>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<StatusSnapshot, PollError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    impl StatusSource for ScriptedSource {
        fn fetch(&self, _job_id: Uuid) -> BoxFuture<'_, Result<StatusSnapshot, PollError>> {
            Box::pin(async move {
                let mut responses = self.responses.lock().unwrap();
                if responses.len() > 1 {
                    responses.pop_front().unwrap()
                } else {
                    clone_response(responses.front().expect("script exhausted"))
                }
            })
        }
    }

    fn clone_response(
        r: &Result<StatusSnapshot, PollError>,
    ) -> Result<StatusSnapshot, PollError> {
        match r {
            Ok(s) => Ok(s.clone()),
            Err(PollError::NotFound) => Err(PollError::NotFound),
            Err(PollError::Transport(e)) => Err(PollError::Transport(e.clone())),
        }
    }

    fn snapshot(status: JobStatus, progress: f32) -> Result<StatusSnapshot, PollError> {
        Ok(StatusSnapshot {
            status,
            progress,
            status_message: None,
            error: None,
        })
    }

    fn fast_config() -> PollConfig {
        PollConfig {
            poll_interval: Duration::from_millis(5),
            tick_interval: Duration::from_millis(2),
            max_consecutive_failures: 3,
            reveal_delay: Duration::from_millis(1),
        }
    }

    async fn run_script(
        script: Vec<Result<StatusSnapshot, PollError>>,
    ) -> (PollOutcome, Vec<PollUpdate>) {
        let source = ScriptedSource::new(script);
        let controller = PollingController::new(fast_config());
        let abort = CancellationToken::new();
        let mut updates = Vec::new();
        let outcome = controller
            .run(Uuid::new_v4(), &source, &abort, |u| updates.push(u))
            .await;
        (outcome, updates)
    }

    #[tokio::test]
    async fn test_runs_to_completed_and_forces_100() {
        let (outcome, updates) = run_script(vec![
            snapshot(JobStatus::Pending, 0.0),
            snapshot(JobStatus::Processing, 5.0),
            snapshot(JobStatus::Processing, 40.0),
            snapshot(JobStatus::Completed, 100.0),
        ])
        .await;

        assert_eq!(outcome, PollOutcome::Completed);
        assert_eq!(updates.last(), Some(&PollUpdate::Completed));

        // The last progress event before the reveal is exactly 100
        let last_progress = updates
            .iter()
            .rev()
            .find_map(|u| match u {
                PollUpdate::Progress { displayed, .. } => Some(*displayed),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress, 100.0);

        // Displayed progress never regresses across the whole run
        let mut last = 0.0f32;
        for update in &updates {
            if let PollUpdate::Progress { displayed, .. } = update {
                assert!(*displayed >= last);
                last = *displayed;
            }
        }
    }

    #[tokio::test]
    async fn test_failed_job_surfaces_error_and_stops() {
        let (outcome, updates) = run_script(vec![
            snapshot(JobStatus::Processing, 10.0),
            Ok(StatusSnapshot {
                status: JobStatus::Failed,
                progress: 10.0,
                status_message: None,
                error: Some("decoder exploded".to_string()),
            }),
        ])
        .await;

        assert_eq!(outcome, PollOutcome::Failed);
        assert!(updates.contains(&PollUpdate::Failed {
            error: "decoder exploded".to_string()
        }));
    }

    #[tokio::test]
    async fn test_not_found_means_connection_lost() {
        let (outcome, updates) = run_script(vec![Err(PollError::NotFound)]).await;
        assert_eq!(outcome, PollOutcome::ConnectionLost);
        assert!(updates.contains(&PollUpdate::ConnectionLost));
    }

    #[tokio::test]
    async fn test_transient_errors_are_swallowed() {
        let (outcome, _) = run_script(vec![
            Err(PollError::Transport("connection refused".to_string())),
            Err(PollError::Transport("connection refused".to_string())),
            snapshot(JobStatus::Processing, 50.0),
            snapshot(JobStatus::Completed, 100.0),
        ])
        .await;

        assert_eq!(outcome, PollOutcome::Completed);
    }

    #[tokio::test]
    async fn test_consecutive_failures_hit_the_bound() {
        let (outcome, updates) = run_script(vec![Err(PollError::Transport(
            "connection refused".to_string(),
        ))])
        .await;

        assert_eq!(outcome, PollOutcome::ServerUnreachable);
        assert_eq!(updates.last(), Some(&PollUpdate::ServerUnreachable));
    }

    #[tokio::test]
    async fn test_success_resets_the_failure_counter() {
        // failure, success, failure, failure, success... never 3 in a row
        let (outcome, _) = run_script(vec![
            Err(PollError::Transport("blip".to_string())),
            Err(PollError::Transport("blip".to_string())),
            snapshot(JobStatus::Processing, 10.0),
            Err(PollError::Transport("blip".to_string())),
            Err(PollError::Transport("blip".to_string())),
            snapshot(JobStatus::Completed, 100.0),
        ])
        .await;

        assert_eq!(outcome, PollOutcome::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_job_stops_polling() {
        let (outcome, updates) = run_script(vec![
            snapshot(JobStatus::Processing, 30.0),
            snapshot(JobStatus::Cancelled, 30.0),
        ])
        .await;

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(updates.last(), Some(&PollUpdate::Cancelled));
    }

    #[tokio::test]
    async fn test_abort_token_stops_immediately() {
        let source = ScriptedSource::new(vec![snapshot(JobStatus::Processing, 10.0)]);
        let controller = PollingController::new(fast_config());
        let abort = CancellationToken::new();
        abort.cancel();

        let outcome = controller
            .run(Uuid::new_v4(), &source, &abort, |_| {})
            .await;
        assert_eq!(outcome, PollOutcome::Aborted);
    }
}
