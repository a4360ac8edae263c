use clap::Parser;
use dotenvy::dotenv;
use rust_file_storage::config::StorageConfig;
use rust_file_storage::infrastructure::storage;
use rust_file_storage::{AppState, create_app};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the HTTP server (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding stored files (overrides STORAGE_ROOT)
    #[arg(short, long)]
    storage_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_file_storage=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Rust File Storage...");

    // 2. Configuration
    let mut config = StorageConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(root) = args.storage_root {
        config.storage_root = root;
    }
    info!(
        "🛡️  Storage Config: Root={:?}, Max Size={}MB, Fetch Timeout={}s, JPEG Quality={}, Strict Images={}",
        config.storage_root,
        config.max_file_size / 1024 / 1024,
        config.fetch_timeout_secs,
        config.jpeg_quality,
        config.strict_image_normalization
    );

    // 3. Storage
    let storage_service = storage::setup_storage(&config).await?;
    let state = AppState::new(storage_service, config.clone())?;

    // 4. HTTP Server
    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ Server listening on: http://{}", addr);
    info!("📖 OpenAPI document: http://localhost:{}/api-docs/openapi.json", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
