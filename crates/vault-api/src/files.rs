use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{error, info};
use uuid::Uuid;

use vault_types::AttachmentMeta;

use crate::error::ApiError;
use crate::middleware::Caller;
use crate::state::AppState;

/// 50 MB upload limit for files
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub name: String,
}

/// POST /files?name=: accepts raw bytes, stores them encrypted under a
/// fresh id and returns attachment metadata for a follow-up message.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Query(query): Query<UploadQuery>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let name = query.name.trim().to_string();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ApiError::bad_request("Validation failed")
            .with_details(format!("file name must be 1-{} bytes", MAX_NAME_LEN)));
    }
    if bytes.is_empty() {
        return Err(ApiError::bad_request("Validation failed").with_details("empty upload"));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(ApiError::bad_request("Validation failed")
            .with_details(format!("uploads are limited to {} bytes", MAX_FILE_SIZE)));
    }

    let file_id = Uuid::new_v4();
    let size = bytes.len() as i64;

    // Checksum and encryption are CPU-bound on large payloads.
    let codec = state.db.codec().clone();
    let (sealed, sha256) = tokio::task::spawn_blocking(move || {
        let digest = hex::encode(Sha256::digest(&bytes));
        codec.encrypt(&bytes).map(|sealed| (sealed, digest))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::internal_server_error("Internal server error")
    })?
    .map_err(|e| {
        error!("Failed to encrypt upload: {}", e);
        ApiError::internal_server_error("Internal server error")
    })?;

    tokio::fs::create_dir_all(&state.file_dir).await.map_err(|e| {
        error!("Failed to create file directory {}: {}", state.file_dir.display(), e);
        ApiError::internal_server_error("Internal server error")
    })?;

    let file_path = state.file_dir.join(file_id.to_string());
    tokio::fs::write(&file_path, &sealed).await.map_err(|e| {
        error!("Failed to write file {}: {}", file_path.display(), e);
        ApiError::internal_server_error("Internal server error")
    })?;

    info!("{} uploaded {} ({} bytes) as {}", me, name, size, file_id);

    Ok((
        StatusCode::CREATED,
        Json(AttachmentMeta {
            url: format!("/files/{}", file_id),
            name,
            size,
            sha256: Some(sha256),
        }),
    ))
}

/// GET /files/{file_id}: decrypts and returns the stored bytes.
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate file_id is a valid UUID to prevent path traversal
    let file_id: Uuid = file_id
        .parse()
        .map_err(|_| ApiError::bad_request("Validation failed").with_details("malformed file id"))?;

    let file_path = state.file_dir.join(file_id.to_string());
    let sealed = match tokio::fs::read(&file_path).await {
        Ok(sealed) => sealed,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Not found").with_details("file not found"));
        }
        Err(e) => {
            error!("Failed to read file {}: {}", file_path.display(), e);
            return Err(ApiError::internal_server_error("Internal server error"));
        }
    };

    let state = Arc::clone(&state);
    let bytes = tokio::task::spawn_blocking(move || state.db.codec().decrypt(&sealed))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::internal_server_error("Internal server error")
        })?
        .map_err(|e| {
            error!("Stored file {} failed to decrypt: {}", file_id, e);
            ApiError::internal_server_error("Decryption failed")
        })?;

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}
