//! # OneWord Backend
//!
//! Asynchronous subtitle-generation service: upload a media file, start a
//! transcription job, poll its progress, download the resulting SRT file.
//!
//! ## Crate Layout:
//! - **config**: layered application configuration (TOML + environment)
//! - **error**: HTTP error types and response mapping
//! - **state**: shared application state (config, job store, metrics)
//! - **jobs**: job records, the job store state machine, and worker tasks
//! - **pipeline**: transcription engine seam and the Whisper implementation
//! - **subtitle**: SRT serialization with the three chunking modes
//! - **storage**: uploaded inputs and generated outputs on disk
//! - **handlers**: HTTP request handlers for the job API
//! - **health**: health check and metrics endpoints
//! - **middleware**: request logging and metrics collection
//! - **client**: polling controller, progress reconciler, and HTTP client
//!   used by the `oneword` CLI

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod jobs;
pub mod middleware;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod subtitle;
