//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler: configuration,
//! the job store, the storage layer, the transcription engine, the worker
//! admission semaphore, and request metrics.
//!
//! The `Arc<RwLock<T>>` pattern gives many concurrent readers or one
//! writer per piece of state; everything here is cheap to clone because
//! clones share the same underlying data.

use crate::config::AppConfig;
use crate::jobs::JobStore;
use crate::pipeline::TranscriptionEngine;
use crate::storage::Storage;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed after startup validation
    pub config: Arc<RwLock<AppConfig>>,

    /// The job registry — single source of truth for job state
    pub jobs: JobStore,

    /// Uploaded inputs and generated outputs on disk
    pub storage: Arc<Storage>,

    /// The transcription engine shared by all worker tasks
    pub engine: Arc<dyn TranscriptionEngine>,

    /// Admission control: bounds concurrently running worker tasks
    pub worker_permits: Arc<Semaphore>,

    /// Request metrics, updated by middleware on every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (for uptime reporting)
    pub start_time: Instant,
}

/// Request counters collected across all endpoints.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since server start
    pub request_count: u64,

    /// Total error responses since server start
    pub error_count: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, storage: Storage, engine: Arc<dyn TranscriptionEngine>) -> Self {
        let worker_permits = Arc::new(Semaphore::new(config.limits.max_concurrent_jobs));
        Self {
            config: Arc::new(RwLock::new(config)),
            jobs: JobStore::new(),
            storage: Arc::new(storage),
            engine,
            worker_permits,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; cloning releases the lock
    /// immediately so readers never block each other for long.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Snapshot for the metrics endpoint; cloned so no lock is held while
    /// the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
