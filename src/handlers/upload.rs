//! # Upload Handler
//!
//! Accepts a media file as multipart form data and stores it under an
//! opaque file id for a later processing request. The upload exists
//! independently of any job; jobs reference it by id.

use crate::{error::AppError, state::AppState};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use tracing::info;

/// Handle `POST /api/upload`.
///
/// ## Request:
/// Multipart form data with the media file in a field named `file`.
///
/// ## Response:
/// ```json
/// { "file_id": "7c9e...", "filename": "talk.mp4", "size": 10485760 }
/// ```
///
/// The size limit is enforced while draining the stream, so an oversized
/// upload is rejected without buffering the whole body.
pub async fn upload_file(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let max_bytes = state.get_config().limits.max_upload_bytes as usize;

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let Some(content_disposition) = field.content_disposition() else {
            continue;
        };
        if content_disposition.get_name() != Some("file") {
            continue;
        }
        filename = content_disposition.get_filename().map(|s| s.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::BadRequest(format!("Upload read error: {}", e)))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::ValidationError(format!(
                    "File too large (max {} bytes)",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        file_bytes = Some(bytes);
    }

    let bytes = file_bytes.ok_or_else(|| AppError::ValidationError("No file provided".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::ValidationError("Uploaded file is empty".to_string()));
    }

    let filename = filename.unwrap_or_else(|| "upload".to_string());
    let size = bytes.len();
    let file_id = state.storage.save_upload(&filename, &bytes).await?;

    info!(file_id = %file_id, filename = %filename, size = size, "File uploaded");

    Ok(HttpResponse::Ok().json(json!({
        "file_id": file_id,
        "filename": filename,
        "size": size
    })))
}
