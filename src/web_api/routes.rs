//! Route handlers for the Armwatch API

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::services::ServeDir;

use crate::artifact_store::ArtifactStore;
use crate::error::Error;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Upload body cap
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Listing size for the recent-detections endpoint
const RECENT_LIMIT: u32 = 50;

const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const ALLOWED_VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "webm"];

/// Create the API router. Artifact URLs (`/thumbnails`, `/annotated/...`)
/// are served straight off the artifact tree; their layout is part of the
/// external contract.
pub fn create_router(state: AppState) -> Router {
    let artifact_root = state.config.artifact_dir.clone();

    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Uploads
        .route("/api/upload/file", post(upload_file))
        .route("/api/live/detect", post(live_detect))
        // Detections
        .route("/api/detections", get(list_detections))
        .route("/api/detections/stats", get(detection_stats))
        .route("/api/detections/clear", delete(clear_detections))
        // Artifacts
        .nest_service(
            "/thumbnails",
            ServeDir::new(artifact_root.join("thumbnails")),
        )
        .nest_service("/annotated", ServeDir::new(artifact_root.join("annotated")))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

// ========================================
// Upload Handlers
// ========================================

/// Multipart image/video upload; dispatched by file extension
async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, Error> {
    let (file_name, data) = read_file_field(&mut multipart)
        .await?
        .ok_or_else(|| Error::Validation("no file part".to_string()))?;

    if file_name.is_empty() {
        return Err(Error::Validation("no selected file".to_string()));
    }

    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        let outcome = state.pipeline.process_image(&data, &file_name).await?;
        let message = if outcome.detections.is_empty() {
            "No weapons detected."
        } else {
            "Detections recorded"
        };
        Ok(Json(ApiResponse::success(json!({
            "message": message,
            "results": outcome.detections,
        })))
        .into_response())
    } else if ALLOWED_VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        let outcome = state.pipeline.process_video(&data, &file_name).await?;
        let message = if outcome.weapons.is_empty() {
            "No weapons detected in video."
        } else {
            "Detections recorded in video"
        };
        Ok(Json(ApiResponse::success(json!({
            "message": message,
            "results": outcome.weapons,
            "frames_scanned": outcome.frames_scanned,
        })))
        .into_response())
    } else {
        Err(Error::Validation(format!("unsupported file type: {:?}", ext)))
    }
}

/// Single live frame + optional caller-side logging threshold
async fn live_detect(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, Error> {
    let mut frame: Option<Vec<u8>> = None;
    let mut threshold: Option<f32> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("frame") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("unreadable frame part: {}", e)))?;
                frame = Some(data.to_vec());
            }
            Some("confidence_threshold") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::Validation(format!("unreadable threshold: {}", e)))?;
                let value: f32 = text.trim().parse().map_err(|_| {
                    Error::Validation(format!("invalid confidence_threshold: {:?}", text))
                })?;
                threshold = Some(value);
            }
            _ => {}
        }
    }

    let frame = frame.ok_or_else(|| Error::Validation("no frame part".to_string()))?;
    let outcome = state.pipeline.process_live_frame(&frame, threshold).await?;
    Ok(Json(ApiResponse::success(outcome)).into_response())
}

/// Pull the `file` field out of a multipart body
async fn read_file_field(multipart: &mut Multipart) -> Result<Option<(String, Vec<u8>)>, Error> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| Error::Validation(format!("unreadable file part: {}", e)))?;
            return Ok(Some((file_name, data.to_vec())));
        }
    }
    Ok(None)
}

// ========================================
// Detection Handlers
// ========================================

/// One record in the recent-detections listing
#[derive(Debug, Serialize)]
struct DetectionListItem {
    id: i64,
    timestamp: String,
    weapon_type: String,
    confidence: f64,
    source: String,
    status: String,
    thumbnail_url: Option<String>,
    annotated_url: Option<String>,
}

async fn list_detections(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_recent(RECENT_LIMIT).await {
        Ok(records) => {
            let items: Vec<DetectionListItem> = records
                .into_iter()
                .map(|r| DetectionListItem {
                    id: r.id,
                    timestamp: r.created_at.to_rfc3339(),
                    weapon_type: r.weapon_type,
                    confidence: r.confidence,
                    source: r.source.as_str().to_string(),
                    status: r.status,
                    thumbnail_url: r.thumbnail_path.as_deref().map(ArtifactStore::url_for),
                    annotated_url: if r.artifact_path.is_empty() {
                        None
                    } else {
                        Some(ArtifactStore::url_for(&r.artifact_path))
                    },
                })
                .collect();
            Json(ApiResponse::success(items)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn detection_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.count_by_source().await {
        Ok(stats) => Json(ApiResponse::success(stats)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn clear_detections(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.clear_all().await {
        Ok(outcome) => Json(ApiResponse::success(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}
