//! # HTTP API Client
//!
//! Thin reqwest wrapper over the job API, used by the `oneword` CLI and
//! anything else that wants to drive the server programmatically. Also
//! the production [`StatusSource`] for the polling controller: status
//! queries carry a per-request timeout so a hung request delays at most
//! one poll tick.

use crate::client::poll::{PollError, StatusSnapshot, StatusSource};
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Upload size limit enforced before any bytes leave the machine.
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Timeout applied to each status query.
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("file is {size} bytes, over the {limit}-byte upload limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("server rejected the request: {0}")]
    Api(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
pub struct UploadedFile {
    pub file_id: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct StartedJob {
    job_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct CancelReply {
    message: String,
}

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?,
        })
    }

    /// Upload a media file. The size check happens before the transfer
    /// starts — an oversized file is rejected locally.
    pub async fn upload(&self, path: &Path) -> Result<UploadedFile, ClientError> {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.len() > MAX_UPLOAD_BYTES {
            return Err(ClientError::FileTooLarge {
                size: metadata.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/api/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// Start processing an uploaded file. Omitted fields use the server's
    /// defaults; omitted language means auto-detect.
    pub async fn start(
        &self,
        file_id: &str,
        model: Option<&str>,
        language: Option<&str>,
        mode: Option<&str>,
    ) -> Result<Uuid, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/process", self.base_url))
            .json(&serde_json::json!({
                "file_id": file_id,
                "model": model,
                "language": language,
                "mode": mode,
            }))
            .send()
            .await?;

        let started: StartedJob = check(response).await?.json().await?;
        Ok(started.job_id)
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<String, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/cancel/{}", self.base_url, job_id))
            .send()
            .await?;

        let reply: CancelReply = check(response).await?.json().await?;
        Ok(reply.message)
    }

    /// Download the finished SRT file to `dest`.
    pub async fn download(&self, job_id: Uuid, dest: &Path) -> Result<(), ClientError> {
        let response = self
            .http
            .get(format!("{}/api/download/{}", self.base_url, job_id))
            .send()
            .await?;

        let bytes = check(response).await?.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

/// One status query, mapped onto the poller's error vocabulary: 404 is
/// the not-found signal, everything else that fails is transport noise.
impl StatusSource for ApiClient {
    fn fetch(&self, job_id: Uuid) -> BoxFuture<'_, Result<StatusSnapshot, PollError>> {
        Box::pin(async move {
            let response = self
                .http
                .get(format!("{}/api/status/{}", self.base_url, job_id))
                .timeout(STATUS_TIMEOUT)
                .send()
                .await
                .map_err(|e| PollError::Transport(e.to_string()))?;

            match response.status() {
                StatusCode::NOT_FOUND => Err(PollError::NotFound),
                status if status.is_success() => response
                    .json::<StatusSnapshot>()
                    .await
                    .map_err(|e| PollError::Transport(e.to_string())),
                status => Err(PollError::Transport(format!(
                    "unexpected status {}",
                    status
                ))),
            }
        })
    }
}

/// Turn non-2xx responses into [`ClientError::Api`] with the server's
/// error message when one is present.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| format!("HTTP {}", status));

    Err(ClientError::Api(message))
}
