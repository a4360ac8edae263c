use crate::api::error::AppError;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Stored files never change once written.
const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parses a single-range `Range` header against a file of `size` bytes.
///
/// Malformed and multi-range headers yield `Full`: the range is ignored and
/// the whole file is served.
pub(crate) fn parse_range(value: &str, size: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // Suffix range: the last `n` bytes
        let Ok(suffix) = end.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return ByteRange::Full,
        }
    };

    if start >= size {
        return ByteRange::Unsatisfiable;
    }

    ByteRange::Partial {
        start,
        end: end.map_or(size - 1, |end| end.min(size - 1)),
    }
}

/// `attachment; filename="<name>"`, plus an RFC 5987 `filename*` when the
/// name cannot be sent as plain quoted ASCII.
pub(crate) fn content_disposition(filename: &str) -> String {
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\')
        .collect::<String>();

    if ascii_filename == filename {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let fallback_filename = if ascii_filename.trim().is_empty() {
        "file"
    } else {
        &ascii_filename
    };
    let encoded_filename = utf8_percent_encode(filename, NON_ALPHANUMERIC).to_string();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    )
}

fn http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<DateTime<Utc>> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// `If-Range` only holds for a date at or after the file's mtime; entity tags
/// are never issued, so any other value fails.
fn if_range_allows(headers: &HeaderMap, last_modified: Option<DateTime<Utc>>) -> bool {
    if !headers.contains_key(header::IF_RANGE) {
        return true;
    }
    match (header_date(headers, header::IF_RANGE), last_modified) {
        (Some(date), Some(modified)) => modified.timestamp() <= date.timestamp(),
        _ => false,
    }
}

#[utoipa::path(
    get,
    path = "/download/{fileName}",
    params(
        ("fileName" = String, Path, description = "Storage name returned by an upload")
    ),
    responses(
        (status = 200, description = "File stream"),
        (status = 206, description = "Requested byte range"),
        (status = 304, description = "Not modified since If-Modified-Since"),
        (status = 404, description = "File not found"),
        (status = 416, description = "Range not satisfiable")
    ),
    tag = "files"
)]
pub async fn download_file(
    State(state): State<crate::AppState>,
    Path(file_name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let download = state.file_service.open_download(&file_name).await?;
    let size = download.object.metadata.size;
    let last_modified = download.object.metadata.last_modified;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, download.content_type.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&download.display_name),
        )
        .header(header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Disposition")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, CACHE_CONTROL);
    if let Some(modified) = &last_modified {
        builder = builder.header(header::LAST_MODIFIED, http_date(modified));
    }

    if let (Some(modified), Some(since)) = (
        last_modified,
        header_date(&headers, header::IF_MODIFIED_SINCE),
    ) {
        if modified.timestamp() <= since.timestamp() {
            return builder
                .status(StatusCode::NOT_MODIFIED)
                .body(Body::empty())
                .map_err(|e| AppError::Internal(e.to_string()));
        }
    }

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) if if_range_allows(&headers, last_modified) => parse_range(value, size),
        _ => ByteRange::Full,
    };

    let mut file = download.object.file;
    let response = match range {
        ByteRange::Unsatisfiable => return Err(AppError::RangeNotSatisfiable(size)),
        ByteRange::Partial { start, end } => {
            let length = end - start + 1;
            tracing::debug!("📤 {} bytes {}-{}/{}", file_name, start, end, size);
            file.seek(SeekFrom::Start(start)).await?;
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, size),
                )
                .header(header::CONTENT_LENGTH, length)
                .body(Body::from_stream(ReaderStream::new(file.take(length))))
        }
        ByteRange::Full => {
            tracing::info!("📤 Serving {} ({} bytes)", file_name, size);
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, size)
                .body(Body::from_stream(ReaderStream::new(file)))
        }
    };

    response.map_err(|e| AppError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(
            parse_range("bytes=0-4", 10),
            ByteRange::Partial { start: 0, end: 4 }
        );
        assert_eq!(
            parse_range("bytes=6-", 10),
            ByteRange::Partial { start: 6, end: 9 }
        );
        assert_eq!(
            parse_range("bytes=-3", 10),
            ByteRange::Partial { start: 7, end: 9 }
        );
        assert_eq!(
            parse_range("bytes=5-100", 10),
            ByteRange::Partial { start: 5, end: 9 }
        );
        assert_eq!(
            parse_range("bytes=-50", 10),
            ByteRange::Partial { start: 0, end: 9 }
        );
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert_eq!(parse_range("bytes=10-", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-0", 0), ByteRange::Unsatisfiable);
    }

    #[test]
    fn test_parse_range_ignores_malformed() {
        assert_eq!(parse_range("items=0-4", 10), ByteRange::Full);
        assert_eq!(parse_range("bytes=0-1,4-5", 10), ByteRange::Full);
        assert_eq!(parse_range("bytes=5-2", 10), ByteRange::Full);
        assert_eq!(parse_range("bytes=a-b", 10), ByteRange::Full);
        assert_eq!(parse_range("bytes=4", 10), ByteRange::Full);
    }

    #[test]
    fn test_content_disposition_plain_ascii() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(
            content_disposition("my_report v2.pdf"),
            "attachment; filename=\"my_report v2.pdf\""
        );
    }

    #[test]
    fn test_content_disposition_non_ascii() {
        assert_eq!(
            content_disposition("résumé.pdf"),
            "attachment; filename=\"rsum.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9%2Epdf"
        );
        assert_eq!(
            content_disposition("日本.txt"),
            "attachment; filename=\".txt\"; filename*=UTF-8''%E6%97%A5%E6%9C%AC%2Etxt"
        );
        assert_eq!(
            content_disposition("\"quoted\".txt"),
            "attachment; filename=\"quoted.txt\"; filename*=UTF-8''%22quoted%22%2Etxt"
        );
    }

    #[test]
    fn test_http_date_round_trip() {
        let dt = DateTime::from_timestamp(1700000000, 0).unwrap();
        let formatted = http_date(&dt);
        assert_eq!(formatted, "Tue, 14 Nov 2023 22:13:20 GMT");

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MODIFIED_SINCE, formatted.parse().unwrap());
        assert_eq!(header_date(&headers, header::IF_MODIFIED_SINCE), Some(dt));
    }

    #[test]
    fn test_if_range() {
        let modified = DateTime::from_timestamp(1700000000, 0).unwrap();
        let mut headers = HeaderMap::new();
        assert!(if_range_allows(&headers, Some(modified)));

        headers.insert(header::IF_RANGE, http_date(&modified).parse().unwrap());
        assert!(if_range_allows(&headers, Some(modified)));

        let older = DateTime::from_timestamp(1600000000, 0).unwrap();
        headers.insert(header::IF_RANGE, http_date(&older).parse().unwrap());
        assert!(!if_range_allows(&headers, Some(modified)));

        headers.insert(header::IF_RANGE, "\"some-etag\"".parse().unwrap());
        assert!(!if_range_allows(&headers, Some(modified)));
    }
}
