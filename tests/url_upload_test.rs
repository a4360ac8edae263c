use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    routing::get,
};
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat, Rgb, RgbImage};
use rust_file_storage::config::StorageConfig;
use rust_file_storage::services::storage::LocalStorageService;
use rust_file_storage::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

const NOT_AN_IMAGE: &[u8] = b"just some plain text, definitely not pixels";
// Starts with the BMP magic number
const BMP_LOOKALIKE: &[u8] = b"BMW quarterly report, plain text only";

fn jpeg_fixture() -> Vec<u8> {
    let img = RgbImage::from_fn(96, 64, |x, y| {
        Rgb([(x * 3 % 256) as u8, (y * 4 % 256) as u8, ((x * y) % 256) as u8])
    });
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 100)
        .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
        .unwrap();
    out
}

/// Serves fixture payloads on an ephemeral local port.
async fn spawn_source_server() -> SocketAddr {
    let source = Router::new()
        .route(
            "/photo.jpg",
            get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], jpeg_fixture()) }),
        )
        .route("/notes.bin", get(|| async { NOT_AN_IMAGE.to_vec() }))
        .route("/report.txt", get(|| async { BMP_LOOKALIKE.to_vec() }))
        .route(
            "/slow.jpg",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                jpeg_fixture()
            }),
        )
        .route("/huge.jpg", get(|| async { vec![0xFFu8; 8192] }))
        .route("/gone.jpg", get(|| async { StatusCode::NOT_FOUND }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, source).await.unwrap();
    });
    addr
}

fn setup_app(dir: &TempDir, config: StorageConfig) -> Router {
    let config = config.with_storage_root(dir.path());
    let storage = Arc::new(LocalStorageService::new(dir.path()));
    create_app(AppState::new(storage, config).unwrap())
}

fn json_request(uri: &str, url: &str, file_name: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "url": url, "fileName": file_name }).to_string(),
        ))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn stored_files(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

#[tokio::test]
async fn test_jpeg_without_timestamp_is_reencoded() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, StorageConfig::default());

    let response = app
        .oneshot(json_request(
            "/uploadFromUrl?no_timestamp=true",
            &format!("http://{}/photo.jpg", addr),
            "pic.jpg",
        ))
        .await
        .unwrap();

    let status = response.status();
    let body = body_text(response).await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body, "pic.jpg");

    let stored = std::fs::read(dir.path().join("pic.jpg")).unwrap();
    let source = jpeg_fixture();
    assert_ne!(stored, source);
    assert!(stored.len() < source.len());
    assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Jpeg);

    let decoded = image::load_from_memory(&stored).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (96, 64));
}

#[tokio::test]
async fn test_url_upload_gets_timestamp_prefix() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, StorageConfig::default());

    let response = app
        .oneshot(json_request(
            "/uploadFromUrl",
            &format!("http://{}/photo.jpg", addr),
            "holiday_photo.jpg",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let storage_name = body_text(response).await;
    let (prefix, rest) = storage_name.split_once('_').unwrap();
    assert!(prefix.bytes().all(|b| b.is_ascii_digit()));
    assert_eq!(rest, "holiday_photo.jpg");
    assert!(dir.path().join(&storage_name).is_file());
}

#[tokio::test]
async fn test_plain_text_url_body() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, StorageConfig::default());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/uploadFromUrl")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(format!("http://{}/photo.jpg", addr)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.ends_with("_photo.jpg"));
}

#[tokio::test]
async fn test_strict_policy_rejects_non_image() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, StorageConfig::default());

    let response = app
        .oneshot(json_request(
            "/uploadFromUrl",
            &format!("http://{}/notes.bin", addr),
            "notes.bin",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "invalid image format");
    assert_eq!(stored_files(&dir), 0);
}

#[tokio::test]
async fn test_strict_policy_rejects_text_with_image_magic() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, StorageConfig::default());

    let response = app
        .oneshot(json_request(
            "/uploadFromUrl?no_timestamp=true",
            &format!("http://{}/report.txt", addr),
            "report.txt",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "invalid image format");
    assert_eq!(stored_files(&dir), 0);
}

#[tokio::test]
async fn test_best_effort_policy_stores_non_image() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, StorageConfig::development());

    let response = app
        .oneshot(json_request(
            "/uploadFromUrl?no_timestamp=true",
            &format!("http://{}/notes.bin", addr),
            "notes.bin",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "notes.bin");
    assert_eq!(
        std::fs::read(dir.path().join("notes.bin")).unwrap(),
        NOT_AN_IMAGE
    );
}

#[tokio::test]
async fn test_remote_payload_over_limit() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        max_file_size: 1024,
        ..StorageConfig::default()
    };
    let app = setup_app(&dir, config);

    let response = app
        .oneshot(json_request(
            "/uploadFromUrl",
            &format!("http://{}/huge.jpg", addr),
            "huge.jpg",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(stored_files(&dir), 0);
}

#[tokio::test]
async fn test_upstream_error_is_internal_error() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, StorageConfig::default());

    let response = app
        .oneshot(json_request(
            "/uploadFromUrl",
            &format!("http://{}/gone.jpg", addr),
            "gone.jpg",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.starts_with("Failed to fetch remote file:"), "body: {}", body);
    assert!(body.contains("404"));
    assert_eq!(stored_files(&dir), 0);
}

#[tokio::test]
async fn test_slow_source_hits_fetch_timeout() {
    let addr = spawn_source_server().await;
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        fetch_timeout_secs: 1,
        ..StorageConfig::default()
    };
    let app = setup_app(&dir, config);

    let started = std::time::Instant::now();
    let response = app
        .oneshot(json_request(
            "/uploadFromUrl",
            &format!("http://{}/slow.jpg", addr),
            "slow.jpg",
        ))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.starts_with("Failed to fetch remote file:"), "body: {}", body);
    assert_eq!(stored_files(&dir), 0);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, StorageConfig::default());

    let response = app
        .clone()
        .oneshot(json_request("/uploadFromUrl", "not a url", "a.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "/uploadFromUrl",
            "http://127.0.0.1:1/a.jpg",
            "",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/uploadFromUrl")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"url\": 42}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(stored_files(&dir), 0);
}
