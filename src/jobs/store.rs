//! # Job Store
//!
//! Process-wide registry mapping job ids to their current state record.
//! The single source of truth: workers write through [`JobStore::apply`],
//! the status endpoint reads snapshots, the sweeper removes expired
//! terminal jobs.
//!
//! ## Merge rules (the invariants live here):
//! - updates to a terminal job are dropped whole — terminal states never
//!   revert, and this is also what makes the cancel/worker race safe
//!   without extra locking
//! - an illegal status transition drops the whole update
//! - a progress value below the stored one is ignored (stored max wins),
//!   so observed progress is monotonically non-decreasing
//! - `completed` forces progress to 100; `failed`/`cancelled` freeze it
//!
//! Exactly one worker task drives a given job, so there is never more than
//! one writer per record; the lock is for cross-job concurrency.

use crate::jobs::{Job, JobConfig, JobStatus, JobUpdate};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

/// Thread-safe job registry. Cloning shares the same underlying store.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
}

/// Per-status totals, reported by the health endpoint.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct JobCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new job in `pending` at progress 0.
    ///
    /// Configuration validation happens before this is called; the store
    /// never holds a job with an unrecognized config.
    pub fn create(&self, file_id: String, config: JobConfig) -> Job {
        let job = Job::new(file_id, config);
        let snapshot = job.clone();

        let mut jobs = self.inner.write().unwrap();
        jobs.insert(
            job.id,
            JobEntry {
                job,
                cancel: CancellationToken::new(),
            },
        );

        snapshot
    }

    /// Read-only snapshot. `None` for unknown or expired ids — the normal
    /// signal a client uses to detect "server restarted".
    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.read().unwrap().get(&id).map(|e| e.job.clone())
    }

    /// Merge a partial update into a job. Returns whether anything was
    /// written; see the module docs for the rules.
    pub fn apply(&self, id: Uuid, update: JobUpdate) -> bool {
        let mut jobs = self.inner.write().unwrap();
        let Some(entry) = jobs.get_mut(&id) else {
            debug!(job_id = %id, "Dropping update for unknown job");
            return false;
        };
        let job = &mut entry.job;

        if job.status.is_terminal() {
            debug!(job_id = %id, status = %job.status, "Dropping update for terminal job");
            return false;
        }

        if let Some(next) = update.status {
            if next != job.status && !job.status.can_transition_to(next) {
                warn!(
                    job_id = %id,
                    from = %job.status,
                    to = %next,
                    "Dropping update with illegal status transition"
                );
                return false;
            }
        }

        if let Some(progress) = update.progress {
            job.progress = job.progress.max(progress.clamp(0.0, 100.0));
        }
        if let Some(message) = update.status_message {
            job.status_message = message;
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(path) = update.output_file {
            job.output_file = Some(path);
        }
        if let Some(next) = update.status {
            job.status = next;
            if next.is_terminal() {
                job.completed_at = Some(Utc::now());
            }
            if next == JobStatus::Completed {
                job.progress = 100.0;
            }
        }

        true
    }

    /// Cancel a job: terminal `cancelled` state plus a signal to its
    /// worker. On an already-terminal job this is a no-op that returns the
    /// unchanged snapshot.
    pub fn cancel(&self, id: Uuid) -> Option<Job> {
        let mut jobs = self.inner.write().unwrap();
        let entry = jobs.get_mut(&id)?;

        if !entry.job.status.is_terminal() {
            entry.job.status = JobStatus::Cancelled;
            entry.job.status_message = "Cancelled by user".to_string();
            entry.job.completed_at = Some(Utc::now());
            entry.cancel.cancel();
            debug!(job_id = %id, "Job cancelled");
        }

        Some(entry.job.clone())
    }

    /// The token a worker watches to stop cooperatively.
    pub fn cancellation_token(&self, id: Uuid) -> Option<CancellationToken> {
        self.inner.read().unwrap().get(&id).map(|e| e.cancel.clone())
    }

    /// Drop terminal jobs older than `retention`. Returns how many were
    /// removed. A removed id becomes indistinguishable from one that never
    /// existed.
    pub fn remove_expired(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut jobs = self.inner.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, entry| {
            if !entry.job.status.is_terminal() {
                return true;
            }
            let terminal_at = entry.job.completed_at.unwrap_or(entry.job.created_at);
            terminal_at > cutoff
        });
        before - jobs.len()
    }

    pub fn counts(&self) -> JobCounts {
        let jobs = self.inner.read().unwrap();
        let mut counts = JobCounts {
            total: jobs.len(),
            ..JobCounts::default()
        };
        for entry in jobs.values() {
            match entry.job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ModelKind;
    use crate::subtitle::SubtitleMode;

    fn test_config() -> JobConfig {
        JobConfig {
            model: ModelKind::Base,
            language: None,
            mode: SubtitleMode::OneWord,
        }
    }

    fn store_with_job() -> (JobStore, Uuid) {
        let store = JobStore::new();
        let job = store.create("file-1".to_string(), test_config());
        (store, job.id)
    }

    #[test]
    fn test_create_and_get() {
        let (store, id) = store_with_job();
        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_get_unknown_id_is_none() {
        let store = JobStore::new();
        assert!(store.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let (store, id) = store_with_job();
        assert!(store.apply(id, JobUpdate::progress(40.0)));
        // A lower value is ignored, the rest of the update still lands
        assert!(store.apply(id, JobUpdate::progress(10.0).with_message("still working")));

        let job = store.get(id).unwrap();
        assert_eq!(job.progress, 40.0);
        assert_eq!(job.status_message, "still working");
    }

    #[test]
    fn test_progress_is_clamped() {
        let (store, id) = store_with_job();
        store.apply(id, JobUpdate::progress(250.0));
        assert_eq!(store.get(id).unwrap().progress, 100.0);
    }

    #[test]
    fn test_completed_forces_progress_100() {
        let (store, id) = store_with_job();
        store.apply(id, JobUpdate::status(JobStatus::Processing).with_progress(55.0));
        store.apply(id, JobUpdate::status(JobStatus::Completed));

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_failed_freezes_progress() {
        let (store, id) = store_with_job();
        store.apply(id, JobUpdate::status(JobStatus::Processing).with_progress(37.0));
        store.apply(
            id,
            JobUpdate::status(JobStatus::Failed).with_error("decoder exploded"),
        );

        let job = store.get(id).unwrap();
        assert_eq!(job.progress, 37.0);
        assert_eq!(job.error.as_deref(), Some("decoder exploded"));
    }

    #[test]
    fn test_terminal_jobs_are_frozen() {
        let (store, id) = store_with_job();
        store.apply(id, JobUpdate::status(JobStatus::Processing));
        store.apply(
            id,
            JobUpdate::status(JobStatus::Failed).with_error("boom"),
        );

        // A late worker write after the terminal transition is dropped
        assert!(!store.apply(id, JobUpdate::status(JobStatus::Completed)));
        assert!(!store.apply(id, JobUpdate::progress(99.0)));

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_pending_can_fail_directly() {
        let (store, id) = store_with_job();
        assert!(store.apply(
            id,
            JobUpdate::status(JobStatus::Failed).with_error("input missing"),
        ));
        assert_eq!(store.get(id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_illegal_transition_dropped_whole() {
        let (store, id) = store_with_job();
        // pending → completed skips processing and is not a failure path
        assert!(!store.apply(
            id,
            JobUpdate::status(JobStatus::Completed).with_progress(80.0)
        ));
        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_cancel_pending_job() {
        let (store, id) = store_with_job();
        let job = store.cancel(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(store.cancellation_token(id).unwrap().is_cancelled());
    }

    #[test]
    fn test_cancel_processing_job_signals_worker() {
        let (store, id) = store_with_job();
        store.apply(id, JobUpdate::status(JobStatus::Processing).with_progress(20.0));
        let token = store.cancellation_token(id).unwrap();
        assert!(!token.is_cancelled());

        store.cancel(id);
        assert!(token.is_cancelled());

        // The worker's late failure write is dropped
        assert!(!store.apply(
            id,
            JobUpdate::status(JobStatus::Failed).with_error("cancelled"),
        ));
        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.progress, 20.0);
    }

    #[test]
    fn test_cancel_terminal_job_is_noop() {
        let (store, id) = store_with_job();
        store.apply(id, JobUpdate::status(JobStatus::Processing));
        store.apply(id, JobUpdate::status(JobStatus::Completed));

        let job = store.cancel(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_cancel_unknown_job_is_none() {
        let store = JobStore::new();
        assert!(store.cancel(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_remove_expired_only_touches_old_terminal_jobs() {
        let (store, done_id) = store_with_job();
        store.apply(done_id, JobUpdate::status(JobStatus::Processing));
        store.apply(done_id, JobUpdate::status(JobStatus::Completed));

        let active = store.create("file-2".to_string(), test_config());

        // Zero retention: every terminal job is already expired
        let removed = store.remove_expired(Duration::from_secs(0));
        assert_eq!(removed, 1);
        assert!(store.get(done_id).is_none());
        assert!(store.get(active.id).is_some());
    }

    #[test]
    fn test_counts() {
        let (store, id) = store_with_job();
        store.apply(id, JobUpdate::status(JobStatus::Processing));
        store.create("file-2".to_string(), test_config());

        let counts = store.counts();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
    }
}
