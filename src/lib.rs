//! Armwatch Library
//!
//! Weapon detection gateway: accepts image/video uploads and live camera
//! frames, runs them through a pretrained detection sidecar, and keeps an
//! evidence log (records + annotated frames + thumbnails) with mail alerts.
//!
//! ## Components
//!
//! 1. Detector - inference sidecar adapter (injectable capability)
//! 2. Annotator - bounding-box overlay + thumbnails
//! 3. IngestPipeline - per-channel detection pipeline (image/video/live)
//! 4. DetectionStore - SQLite persistence for detection records
//! 5. ArtifactStore - evidence image tree (thumbnails + annotated logs)
//! 6. Alert - fire-and-forget SMTP notifications
//! 7. Video - bounded ffmpeg frame extraction
//! 8. WebAPI - REST API endpoints

pub mod alert;
pub mod annotator;
pub mod artifact_store;
pub mod detection_store;
pub mod detector;
pub mod error;
pub mod ingest;
pub mod models;
pub mod state;
pub mod video;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
