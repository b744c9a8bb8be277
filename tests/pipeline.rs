//! End-to-end ingestion pipeline tests against a scripted detector,
//! a counting notifier, tempdir artifacts, and an in-memory database.

use armwatch::alert::Notifier;
use armwatch::annotator::{encode_jpeg, Annotator};
use armwatch::artifact_store::ArtifactStore;
use armwatch::detection_store::DetectionStore;
use armwatch::detector::{Detector, NormBox, RawDetection};
use armwatch::error::{Error, Result};
use armwatch::ingest::IngestPipeline;
use armwatch::models::SourceChannel;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Detector returning a scripted result per call, then a fixed fallback
struct ScriptedDetector {
    script: Mutex<VecDeque<Vec<RawDetection>>>,
    fallback: Vec<RawDetection>,
    labels: Vec<String>,
}

impl ScriptedDetector {
    fn scripted(per_call: Vec<Vec<RawDetection>>, labels: &[&str]) -> Self {
        Self {
            script: Mutex::new(per_call.into()),
            fallback: Vec::new(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn constant(detections: Vec<RawDetection>, labels: &[&str]) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: detections,
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn infer(&self, _jpeg: &[u8]) -> Result<Vec<RawDetection>> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn label(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Notifier that records alerts instead of sending them
#[derive(Default)]
struct CountingNotifier {
    count: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl Notifier for CountingNotifier {
    fn notify(&self, recipient: &str, weapon_type: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), weapon_type.to_string()));
    }
}

struct Harness {
    pipeline: Arc<IngestPipeline>,
    store: DetectionStore,
    alerts: Arc<CountingNotifier>,
    artifact_root: PathBuf,
    _tmp: tempfile::TempDir,
}

async fn harness(detector: ScriptedDetector) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let artifact_root = tmp.path().join("artifacts");

    // Single connection so every handle sees the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = DetectionStore::new(pool);
    store.ensure_schema().await.unwrap();

    let artifacts = ArtifactStore::new(artifact_root.clone()).await.unwrap();
    let alerts = Arc::new(CountingNotifier::default());

    let pipeline = Arc::new(IngestPipeline::new(
        Arc::new(detector),
        Annotator::new(Path::new("/nonexistent/font.ttf")),
        artifacts,
        store.clone(),
        alerts.clone(),
        Some("ops@example.com".to_string()),
        0.75,
        0.8,
        50,
        tmp.path().join("temp"),
    ));

    Harness {
        pipeline,
        store,
        alerts,
        artifact_root,
        _tmp: tmp,
    }
}

fn raw(class_id: u32, confidence: f32) -> RawDetection {
    RawDetection {
        class_id,
        confidence,
        bbox: NormBox {
            x1: 0.1,
            y1: 0.1,
            x2: 0.6,
            y2: 0.7,
        },
    }
}

fn jpeg_frame(shade: u8) -> Vec<u8> {
    let frame = RgbImage::from_pixel(64, 48, Rgb([shade, shade / 2, 10]));
    encode_jpeg(&frame).unwrap()
}

fn count_files(dir: &Path) -> usize {
    let mut count = 0;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += count_files(&path);
            } else {
                count += 1;
            }
        }
    }
    count
}

#[tokio::test]
async fn image_without_detections_has_no_side_effects() {
    let h = harness(ScriptedDetector::scripted(vec![vec![]], &["knife"])).await;

    let outcome = h
        .pipeline
        .process_image(&jpeg_frame(100), "clean.jpg")
        .await
        .unwrap();

    assert!(outcome.detections.is_empty());
    assert!(h.store.list_recent(50).await.unwrap().is_empty());
    assert_eq!(h.alerts.count.load(Ordering::SeqCst), 0);
    assert_eq!(count_files(&h.artifact_root), 0);
}

#[tokio::test]
async fn image_records_each_detection_and_alerts_once() {
    let h = harness(ScriptedDetector::constant(
        vec![raw(0, 0.91), raw(1, 0.82)],
        &["knife", "pistol"],
    ))
    .await;

    let outcome = h
        .pipeline
        .process_image(&jpeg_frame(50), "holdup.jpg")
        .await
        .unwrap();

    // One record per detection, not deduplicated
    assert_eq!(outcome.detections.len(), 2);
    let records = h.store.list_recent(50).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.source == SourceChannel::Image));

    // Alert fired once, for the first detection in the list
    assert_eq!(h.alerts.count.load(Ordering::SeqCst), 1);
    assert_eq!(h.alerts.sent.lock().unwrap()[0].1, "knife");

    // Artifacts exist where the derived URLs point
    let det = &outcome.detections[0];
    let annotated_rel = det.annotated_url.as_ref().unwrap().trim_start_matches('/');
    assert!(h.artifact_root.join(annotated_rel).is_file());
    let thumb_rel = det.thumbnail_url.as_ref().unwrap().trim_start_matches('/');
    assert!(thumb_rel.starts_with("thumbnails/thumb_"));
    assert!(h.artifact_root.join(thumb_rel).is_file());
}

#[tokio::test]
async fn video_logs_first_occurrence_per_label_only() {
    // knife shows up in frames 3 and 40; every other frame is clean
    let mut per_call: Vec<Vec<RawDetection>> = vec![Vec::new(); 40];
    per_call[2] = vec![raw(0, 0.9)];
    per_call[39] = vec![raw(0, 0.85)];
    let h = harness(ScriptedDetector::scripted(per_call, &["knife"])).await;

    let frames: Vec<RgbImage> = (0..40).map(|_| RgbImage::new(64, 48)).collect();
    let outcome = h
        .pipeline
        .process_video_frames(frames, "clip.mp4")
        .await
        .unwrap();

    assert_eq!(outcome.frames_scanned, 40);
    assert_eq!(outcome.weapons.len(), 1);
    let weapon = &outcome.weapons[0];
    assert_eq!(weapon.weapon_type, "knife");
    assert_eq!(weapon.first_seen_frame, 3);
    assert_eq!(weapon.sightings, 2);

    // Exactly one record and one alert despite two sightings
    let records = h.store.list_recent(50).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, SourceChannel::Video);
    assert_eq!(h.alerts.count.load(Ordering::SeqCst), 1);

    // The evidence frame is the first sighting
    let annotated = weapon.annotated_url.as_ref().unwrap();
    assert!(annotated.contains("frame0003"), "got {}", annotated);
}

#[tokio::test]
async fn video_stops_at_frame_cap() {
    // A weapon first appearing after the cap is never seen
    let mut per_call: Vec<Vec<RawDetection>> = vec![Vec::new(); 60];
    per_call[54] = vec![raw(0, 0.95)];
    let h = harness(ScriptedDetector::scripted(per_call, &["rifle"])).await;

    let frames: Vec<RgbImage> = (0..60).map(|_| RgbImage::new(32, 32)).collect();
    let outcome = h
        .pipeline
        .process_video_frames(frames, "long.mp4")
        .await
        .unwrap();

    assert_eq!(outcome.frames_scanned, 50);
    assert!(outcome.weapons.is_empty());
    assert!(h.store.list_recent(50).await.unwrap().is_empty());
}

#[tokio::test]
async fn video_distinct_labels_each_alert() {
    let mut per_call: Vec<Vec<RawDetection>> = vec![Vec::new(); 10];
    per_call[1] = vec![raw(0, 0.9)];
    per_call[5] = vec![raw(1, 0.88), raw(0, 0.8)];
    let h = harness(ScriptedDetector::scripted(per_call, &["knife", "pistol"])).await;

    let frames: Vec<RgbImage> = (0..10).map(|_| RgbImage::new(32, 32)).collect();
    let outcome = h
        .pipeline
        .process_video_frames(frames, "two.mp4")
        .await
        .unwrap();

    assert_eq!(outcome.weapons.len(), 2);
    assert_eq!(h.store.list_recent(50).await.unwrap().len(), 2);
    assert_eq!(h.alerts.count.load(Ordering::SeqCst), 2);

    let knife = outcome
        .weapons
        .iter()
        .find(|w| w.weapon_type == "knife")
        .unwrap();
    assert_eq!(knife.sightings, 2);
    assert_eq!(knife.first_seen_frame, 2);
}

#[tokio::test]
async fn live_frame_returns_but_does_not_log_below_caller_threshold() {
    let h = harness(ScriptedDetector::constant(vec![raw(0, 0.9)], &["pistol"])).await;

    let outcome = h
        .pipeline
        .process_live_frame(&jpeg_frame(80), Some(0.95))
        .await
        .unwrap();

    // Surfaced to the caller with its box, but below the logging cutoff
    assert_eq!(outcome.detections.len(), 1);
    let det = &outcome.detections[0];
    assert!(!det.logged);
    assert!(det.record_id.is_none());
    assert_eq!(det.norm_box, [0.1, 0.1, 0.6, 0.7]);

    assert_eq!(outcome.logged, 0);
    assert!(h.store.list_recent(50).await.unwrap().is_empty());
    assert_eq!(h.alerts.count.load(Ordering::SeqCst), 0);
    assert_eq!(count_files(&h.artifact_root), 0);
}

#[tokio::test]
async fn live_frame_logs_when_caller_threshold_cleared() {
    let h = harness(ScriptedDetector::constant(
        vec![raw(0, 0.9), raw(1, 0.78)],
        &["pistol", "knife"],
    ))
    .await;

    let outcome = h
        .pipeline
        .process_live_frame(&jpeg_frame(80), Some(0.85))
        .await
        .unwrap();

    // Both detections surfaced, only the qualifying one logged
    assert_eq!(outcome.detections.len(), 2);
    assert!(outcome.detections[0].logged);
    assert!(outcome.detections[0].record_id.is_some());
    assert!(!outcome.detections[1].logged);
    assert_eq!(outcome.logged, 1);

    let records = h.store.list_recent(50).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, SourceChannel::Live);
    assert_eq!(records[0].weapon_type, "pistol");
    assert_eq!(h.alerts.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn live_frame_rejects_out_of_range_threshold() {
    let h = harness(ScriptedDetector::constant(vec![], &[])).await;
    let err = h
        .pipeline
        .process_live_frame(&jpeg_frame(10), Some(1.5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn clear_all_removes_rows_and_files() {
    let h = harness(ScriptedDetector::constant(vec![raw(0, 0.9)], &["knife"])).await;

    h.pipeline
        .process_image(&jpeg_frame(60), "one.jpg")
        .await
        .unwrap();
    h.pipeline
        .process_image(&jpeg_frame(70), "two.jpg")
        .await
        .unwrap();
    assert!(count_files(&h.artifact_root) > 0);

    let outcome = h.pipeline.clear_all().await.unwrap();
    assert_eq!(outcome.deleted, 2);
    assert_eq!(outcome.files_removed, 4);
    assert!(outcome.cleanup_errors.is_empty());

    assert!(h.store.list_recent(50).await.unwrap().is_empty());
    assert_eq!(count_files(&h.artifact_root), 0);
}

#[tokio::test]
async fn concurrent_uploads_do_not_interfere() {
    let h = harness(ScriptedDetector::constant(vec![raw(0, 0.9)], &["knife"])).await;

    let a = {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move { pipeline.process_image(&jpeg_frame(10), "a.jpg").await })
    };
    let b = {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move { pipeline.process_image(&jpeg_frame(200), "b.jpg").await })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a.detections.len(), 1);
    assert_eq!(b.detections.len(), 1);
    assert_ne!(a.detections[0].id, b.detections[0].id);

    // Each upload independently produced its own record
    assert_eq!(h.store.list_recent(50).await.unwrap().len(), 2);
}
