use crate::api::error::AppError;
use crate::services::file_service::BodyError;
use crate::utils::naming::DEFAULT_FILENAME;
use axum::{
    body::Bytes,
    extract::{
        Multipart, Query, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode, header},
};
use futures::TryStreamExt;
use percent_encoding::percent_decode_str;
use tokio_util::io::StreamReader;
use validator::Validate;

use super::types::*;

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Storage name of the uploaded file", body = String, content_type = "text/plain"),
        (status = 400, description = "Malformed form or missing `file` field"),
        (status = 413, description = "File is too large"),
        (status = 500, description = "File could not be written")
    ),
    tag = "files"
)]
pub async fn upload_file(
    State(state): State<crate::AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<String, AppError> {
    let mut multipart = multipart.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(rejection.body_text())
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    })?;

    let max_file_size = state.file_service.max_file_size();
    if declared_length(&headers).is_some_and(|len| len > max_file_size as u64) {
        return Err(AppError::PayloadTooLarge(format!(
            "File is too large (limit {} MB)",
            max_file_size / 1024 / 1024
        )));
    }

    let result: Result<String, AppError> = async {
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some("file") {
                continue;
            }

            let original_filename = field.file_name().unwrap_or(DEFAULT_FILENAME).to_string();
            let body = field.map_err(|e| {
                let body_error = if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    BodyError::TooLarge
                } else {
                    BodyError::Malformed(e.body_text())
                };
                std::io::Error::other(body_error)
            });
            let reader = StreamReader::new(body);

            return state
                .file_service
                .upload(&original_filename, Box::new(reader))
                .await;
        }

        Err(AppError::BadRequest("No file provided".to_string()))
    }
    .await;

    if let Err(e) = &result {
        // Drain what is left so the client sees the error instead of a reset connection
        tracing::warn!("Upload failed: {}. Consuming remaining stream...", e);
        while let Ok(Some(mut field)) = multipart.next_field().await {
            while let Ok(Some(_)) = field.chunk().await {}
        }
    }

    result
}

/// Target name for the plain-text form: the last segment of the URL path.
fn name_from_url(raw: &str) -> Result<String, AppError> {
    let url = crate::services::remote_fetch::RemoteFetcher::parse_url(raw)?;
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .ok_or_else(|| AppError::BadRequest("URL has no file name; use the JSON form".to_string()))
}

#[utoipa::path(
    post,
    path = "/uploadFromUrl",
    params(UploadFromUrlQuery),
    request_body(content = UploadFromUrlRequest, description = "JSON object, or the source URL as plain text"),
    responses(
        (status = 200, description = "Storage name of the fetched file", body = String, content_type = "text/plain"),
        (status = 400, description = "Invalid request or invalid image format"),
        (status = 413, description = "Remote file is too large"),
        (status = 500, description = "Fetch, decode or write failure")
    ),
    tag = "files"
)]
pub async fn upload_from_url(
    State(state): State<crate::AppState>,
    Query(query): Query<UploadFromUrlQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, AppError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"));

    let (url, file_name) = if is_json {
        let req: UploadFromUrlRequest = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?;
        req.validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        (req.url, req.file_name)
    } else {
        let raw = std::str::from_utf8(&body)
            .map_err(|_| AppError::BadRequest("URL must be valid UTF-8".to_string()))?
            .trim()
            .to_string();
        let file_name = name_from_url(&raw)?;
        (raw, file_name)
    };

    tracing::info!(
        "📥 URL upload: {} as {} (no_timestamp={})",
        url,
        file_name,
        query.no_timestamp
    );

    state
        .file_service
        .upload_from_url(&url, &file_name, query.no_timestamp)
        .await
}
