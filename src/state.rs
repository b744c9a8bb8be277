//! Application state
//!
//! Holds all shared components and state

use crate::detection_store::DetectionStore;
use crate::detector::Detector;
use crate::ingest::IngestPipeline;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Detection sidecar URL
    pub detector_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Root of the artifact tree (thumbnails + per-channel annotated logs)
    pub artifact_dir: PathBuf,
    /// Temporary directory (video uploads + frame dumps)
    pub temp_dir: PathBuf,
    /// Frontend static directory
    pub static_dir: String,
    /// TTF font for annotation captions
    pub font_path: PathBuf,
    /// Fixed internal confidence cutoff for what counts as detected at all
    pub detect_threshold: f32,
    /// Default caller-side cutoff for logging live-frame detections
    pub live_log_threshold: f32,
    /// Maximum video frames processed per upload
    pub video_frame_cap: u32,
    /// Alert recipient address (alerting disabled when unset)
    pub alert_recipient: Option<String>,
    /// SMTP relay host
    pub smtp_host: Option<String>,
    /// SMTP relay port
    pub smtp_port: u16,
    /// SMTP username
    pub smtp_username: Option<String>,
    /// SMTP password
    pub smtp_password: Option<String>,
    /// From address for alert mail
    pub smtp_from: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/armwatch.db?mode=rwc".to_string()),
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            artifact_dir: std::env::var("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/artifacts")),
            temp_dir: std::env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/temp")),
            static_dir: std::env::var("STATIC_DIR")
                .unwrap_or_else(|_| "frontend/dist".to_string()),
            font_path: std::env::var("FONT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")
                }),
            detect_threshold: std::env::var("DETECT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(crate::detector::DEFAULT_THRESHOLD),
            live_log_threshold: std::env::var("LIVE_LOG_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.8),
            video_frame_cap: std::env::var("VIDEO_FRAME_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            alert_recipient: std::env::var("ALERT_RECIPIENT").ok(),
            smtp_host: std::env::var("SMTP_HOST").ok(),
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(587),
            smtp_username: std::env::var("SMTP_USERNAME").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            smtp_from: std::env::var("SMTP_FROM").ok(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Detector capability (sidecar adapter, fake in tests)
    pub detector: Arc<dyn Detector>,
    /// Detection record persistence
    pub store: DetectionStore,
    /// Upload/live-frame ingestion pipeline
    pub pipeline: Arc<IngestPipeline>,
}
