//! Armwatch - weapon detection gateway
//!
//! Main entry point for the gateway server.

use armwatch::{
    alert::{NoopNotifier, Notifier, SmtpNotifier, SmtpSettings},
    annotator::Annotator,
    artifact_store::ArtifactStore,
    detection_store::DetectionStore,
    detector::{Detector, HttpDetector},
    ingest::IngestPipeline,
    state::{AppConfig, AppState},
    video, web_api,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parent directory of a sqlite database URL, if it points at a file
fn database_parent(url: &str) -> Option<PathBuf> {
    let path = url.strip_prefix("sqlite://")?;
    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "armwatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Armwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        detector_url = %config.detector_url,
        artifact_dir = %config.artifact_dir.display(),
        temp_dir = %config.temp_dir.display(),
        "Configuration loaded"
    );

    // Create working directories
    if let Some(parent) = database_parent(&config.database_url) {
        tokio::fs::create_dir_all(&parent).await?;
    }
    tokio::fs::create_dir_all(&config.temp_dir).await?;

    // Create database pool
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    let store = DetectionStore::new(pool.clone());
    store.ensure_schema().await?;

    // ffmpeg is only needed for video uploads; report early if missing
    match video::check_ffmpeg().await {
        Ok(version) => tracing::info!(version = %version, "ffmpeg available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg unavailable, video uploads will fail"),
    }

    // Initialize components
    let detector: Arc<dyn Detector> =
        Arc::new(HttpDetector::connect(config.detector_url.clone()).await);
    let annotator = Annotator::new(&config.font_path);
    let artifacts = ArtifactStore::new(config.artifact_dir.clone()).await?;
    tracing::info!("ArtifactStore initialized");

    let notifier: Arc<dyn Notifier> = match (
        &config.smtp_host,
        &config.smtp_username,
        &config.smtp_password,
    ) {
        (Some(host), Some(username), Some(password)) => {
            match SmtpNotifier::new(SmtpSettings {
                host: host.clone(),
                port: config.smtp_port,
                username: username.clone(),
                password: password.clone(),
                from: config.smtp_from.clone(),
            }) {
                Ok(notifier) => {
                    tracing::info!(host = %host, "SMTP alerting enabled");
                    Arc::new(notifier)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SMTP setup failed, alerting disabled");
                    Arc::new(NoopNotifier)
                }
            }
        }
        _ => {
            tracing::info!("SMTP not configured, alerting disabled");
            Arc::new(NoopNotifier)
        }
    };
    if config.alert_recipient.is_none() {
        tracing::info!("ALERT_RECIPIENT not set, alerts will be dropped");
    }

    let pipeline = Arc::new(IngestPipeline::new(
        detector.clone(),
        annotator,
        artifacts,
        store.clone(),
        notifier,
        config.alert_recipient.clone(),
        config.detect_threshold,
        config.live_log_threshold,
        config.video_frame_cap,
        config.temp_dir.clone(),
    ));
    tracing::info!(
        detect_threshold = config.detect_threshold,
        live_log_threshold = config.live_log_threshold,
        video_frame_cap = config.video_frame_cap,
        "IngestPipeline initialized"
    );

    // Create application state
    let state = AppState {
        config,
        detector,
        store,
        pipeline,
    };

    // Create router with static file serving
    let static_dir = state.config.static_dir.clone();
    let serve_dir = ServeDir::new(&static_dir)
        .not_found_service(ServeFile::new(format!("{}/index.html", static_dir)));

    let app = web_api::create_router(state.clone())
        .fallback_service(serve_dir)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    tracing::info!(static_dir = %static_dir, "Static file serving enabled");

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
