//! # Client-Side Protocol
//!
//! Everything a client needs to drive a job to completion against the
//! HTTP API: the [`ApiClient`], the [`PollingController`] that owns the
//! repeating status queries, and the [`ProgressReconciler`] that keeps a
//! displayed progress value moving between sparse server updates.
//!
//! All per-job client state lives in explicit objects with one teardown
//! path each — there are no globals to forget to clear.

pub mod http;
pub mod poll;
pub mod progress;

pub use http::{ApiClient, ClientError};
pub use poll::{PollConfig, PollError, PollOutcome, PollUpdate, PollingController, StatusSource};
pub use progress::ProgressReconciler;

use uuid::Uuid;

/// What a client holds while a job is in flight. `reset` clears the whole
/// session atomically; it is the single "start over" path used after a
/// terminal status, a not-found, or a user abort.
#[derive(Debug, Default, Clone)]
pub struct ClientSession {
    pub file_id: Option<String>,
    pub job_id: Option<Uuid>,
}

impl ClientSession {
    pub fn reset(&mut self) {
        self.file_id = None;
        self.job_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_everything() {
        let mut session = ClientSession {
            file_id: Some("f".to_string()),
            job_id: Some(Uuid::new_v4()),
        };
        session.reset();
        assert!(session.file_id.is_none());
        assert!(session.job_id.is_none());
    }
}
