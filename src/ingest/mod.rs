//! Ingest - Upload/Frame Detection Pipeline
//!
//! ## Responsibilities
//!
//! - Drive the detector across uploaded images, video frames, and live frames
//! - Decide which detections are new (first occurrence per weapon label
//!   within one request) and trigger side effects
//! - Record + maybe-alert convergence step shared by all three paths
//! - Bulk clear (records first, artifact purge second)
//!
//! Side-effect coupling is best-effort by design: an annotation or thumbnail
//! failure leaves the corresponding record field empty instead of rolling
//! back, and alerts are dispatched alongside persistence with no ordering
//! guarantee beyond "after the first successful write of the request".

use crate::alert::Notifier;
use crate::annotator::Annotator;
use crate::artifact_store::ArtifactStore;
use crate::detection_store::{DetectionStore, NewDetection};
use crate::detector::{detect, BoundingBoxDetection, Detector};
use crate::error::{Error, Result};
use crate::models::SourceChannel;
use crate::video;
use image::RgbImage;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

/// One persisted detection as reported back to the uploader
#[derive(Debug, Clone, Serialize)]
pub struct RecordedDetection {
    pub id: i64,
    pub weapon_type: String,
    pub confidence: f32,
    pub annotated_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Image upload outcome; an empty detection list means nothing was persisted
#[derive(Debug, Serialize)]
pub struct ImageOutcome {
    pub detections: Vec<RecordedDetection>,
}

/// Per-label summary for a video upload
#[derive(Debug, Clone, Serialize)]
pub struct VideoWeaponSummary {
    pub weapon_type: String,
    /// Confidence of the first sighting
    pub confidence: f32,
    /// 1-based frame number of the first sighting
    pub first_seen_frame: u32,
    /// Total sightings across scanned frames, first included
    pub sightings: u32,
    pub record_id: i64,
    pub annotated_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Video upload outcome
#[derive(Debug, Serialize)]
pub struct VideoOutcome {
    pub weapons: Vec<VideoWeaponSummary>,
    /// Frames actually scanned (the cap may truncate the video)
    pub frames_scanned: u32,
}

/// One detection surfaced to a live-frame caller.
///
/// The normalized box is always included; `logged` tells whether the
/// detection also cleared the caller-supplied threshold and was persisted.
#[derive(Debug, Clone, Serialize)]
pub struct LiveDetection {
    pub weapon_type: String,
    pub confidence: f32,
    pub norm_box: [f32; 4],
    pub logged: bool,
    pub record_id: Option<i64>,
}

/// Live frame outcome
#[derive(Debug, Serialize)]
pub struct LiveOutcome {
    pub detections: Vec<LiveDetection>,
    pub logged: u32,
}

/// Clear-all outcome. Database and filesystem results are reported
/// separately: rows are gone even when some artifact files resisted.
#[derive(Debug, Serialize)]
pub struct ClearOutcome {
    pub deleted: u64,
    pub files_removed: u64,
    pub cleanup_errors: Vec<String>,
}

/// IngestPipeline instance
pub struct IngestPipeline {
    detector: Arc<dyn Detector>,
    annotator: Annotator,
    artifacts: ArtifactStore,
    store: DetectionStore,
    notifier: Arc<dyn Notifier>,
    alert_recipient: Option<String>,
    detect_threshold: f32,
    live_log_threshold: f32,
    video_frame_cap: u32,
    temp_dir: PathBuf,
}

impl IngestPipeline {
    /// Create new IngestPipeline
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: Arc<dyn Detector>,
        annotator: Annotator,
        artifacts: ArtifactStore,
        store: DetectionStore,
        notifier: Arc<dyn Notifier>,
        alert_recipient: Option<String>,
        detect_threshold: f32,
        live_log_threshold: f32,
        video_frame_cap: u32,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            detector,
            annotator,
            artifacts,
            store,
            notifier,
            alert_recipient,
            detect_threshold,
            live_log_threshold,
            video_frame_cap,
            temp_dir,
        }
    }

    /// Run the image path: decode once, detect, and on any hit persist one
    /// record per detection (shared annotated artifact + thumbnail), alerting
    /// once for the first detection in the list.
    pub async fn process_image(&self, data: &[u8], upload_name: &str) -> Result<ImageOutcome> {
        let frame = decode_frame(data)?;
        let detections = detect(self.detector.as_ref(), &frame, self.detect_threshold).await?;

        if detections.is_empty() {
            tracing::info!(upload = %upload_name, "No weapons detected in image");
            return Ok(ImageOutcome {
                detections: Vec::new(),
            });
        }

        let stem = self.artifacts.new_stem(upload_name);

        let mut annotated = frame.clone();
        self.annotator.annotate(&mut annotated, &detections);
        let annotated_rel = self
            .save_annotated_logged(SourceChannel::Image, &format!("{}.jpg", stem), &annotated)
            .await;
        // Thumbnail comes from the original, not the annotated copy
        let thumbnail_rel = self.save_thumbnail_logged(&stem, &frame).await;

        let mut recorded = Vec::with_capacity(detections.len());
        for (i, det) in detections.iter().enumerate() {
            let id = self
                .store
                .create(&NewDetection {
                    weapon_type: det.label.clone(),
                    confidence: det.confidence as f64,
                    source: SourceChannel::Image,
                    artifact_path: annotated_rel.clone().unwrap_or_default(),
                    thumbnail_path: thumbnail_rel.clone(),
                })
                .await?;

            if i == 0 {
                self.dispatch_alert(&det.label);
            }

            recorded.push(RecordedDetection {
                id,
                weapon_type: det.label.clone(),
                confidence: det.confidence,
                annotated_url: annotated_rel.as_deref().map(ArtifactStore::url_for),
                thumbnail_url: thumbnail_rel.as_deref().map(ArtifactStore::url_for),
            });
        }

        tracing::info!(
            upload = %upload_name,
            detections = recorded.len(),
            "Image upload processed"
        );

        Ok(ImageOutcome {
            detections: recorded,
        })
    }

    /// Run the video path: dump up to the frame cap via ffmpeg, then scan
    pub async fn process_video(&self, data: &[u8], upload_name: &str) -> Result<VideoOutcome> {
        fs::create_dir_all(&self.temp_dir).await?;
        let upload_path = self
            .temp_dir
            .join(format!("upload_{}", Uuid::new_v4().simple()));
        fs::write(&upload_path, data).await?;

        let frames =
            video::extract_frames(&upload_path, self.video_frame_cap, &self.temp_dir).await;

        if let Err(e) = fs::remove_file(&upload_path).await {
            tracing::warn!(
                path = %upload_path.display(),
                error = %e,
                "Failed to remove uploaded video"
            );
        }

        self.process_video_frames(frames?, upload_name).await
    }

    /// Scan decoded video frames in order.
    ///
    /// Only the first occurrence of each distinct weapon label across the
    /// whole video triggers artifact creation, persistence, and an alert;
    /// later sightings of a seen label only bump the response summary.
    pub async fn process_video_frames(
        &self,
        frames: Vec<RgbImage>,
        upload_name: &str,
    ) -> Result<VideoOutcome> {
        let stem = self.artifacts.new_stem(upload_name);

        let mut weapons: Vec<VideoWeaponSummary> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut frames_scanned = 0u32;

        for (idx, frame) in frames.iter().enumerate() {
            if frames_scanned >= self.video_frame_cap {
                break;
            }
            frames_scanned += 1;
            let frame_no = idx as u32 + 1;

            let detections = detect(self.detector.as_ref(), frame, self.detect_threshold).await?;
            if detections.is_empty() {
                continue;
            }

            // Frame artifacts are produced at most once per frame, and only
            // when the frame carries a first sighting
            let carries_new = detections.iter().any(|d| !seen.contains_key(&d.label));
            let (annotated_rel, thumbnail_rel) = if carries_new {
                let frame_stem = format!("{}_frame{:04}", stem, frame_no);
                let mut annotated = frame.clone();
                self.annotator.annotate(&mut annotated, &detections);
                (
                    self.save_annotated_logged(
                        SourceChannel::Video,
                        &format!("{}.jpg", frame_stem),
                        &annotated,
                    )
                    .await,
                    self.save_thumbnail_logged(&frame_stem, frame).await,
                )
            } else {
                (None, None)
            };

            for det in &detections {
                if let Some(&i) = seen.get(&det.label) {
                    weapons[i].sightings += 1;
                    continue;
                }

                let id = self
                    .store
                    .create(&NewDetection {
                        weapon_type: det.label.clone(),
                        confidence: det.confidence as f64,
                        source: SourceChannel::Video,
                        artifact_path: annotated_rel.clone().unwrap_or_default(),
                        thumbnail_path: thumbnail_rel.clone(),
                    })
                    .await?;

                self.dispatch_alert(&det.label);

                seen.insert(det.label.clone(), weapons.len());
                weapons.push(VideoWeaponSummary {
                    weapon_type: det.label.clone(),
                    confidence: det.confidence,
                    first_seen_frame: frame_no,
                    sightings: 1,
                    record_id: id,
                    annotated_url: annotated_rel.as_deref().map(ArtifactStore::url_for),
                    thumbnail_url: thumbnail_rel.as_deref().map(ArtifactStore::url_for),
                });
            }
        }

        tracing::info!(
            upload = %upload_name,
            frames_scanned = frames_scanned,
            distinct_weapons = weapons.len(),
            "Video upload processed"
        );

        Ok(VideoOutcome {
            weapons,
            frames_scanned,
        })
    }

    /// Run the live path: one frame, stateless.
    ///
    /// The detector's fixed internal threshold decides what is detected at
    /// all; the caller-supplied threshold (falling back to the configured
    /// default) decides what gets logged. Every detection is returned with
    /// its normalized box either way.
    pub async fn process_live_frame(
        &self,
        data: &[u8],
        confidence_threshold: Option<f32>,
    ) -> Result<LiveOutcome> {
        let log_threshold = confidence_threshold.unwrap_or(self.live_log_threshold);
        if !(0.0..=1.0).contains(&log_threshold) {
            return Err(Error::Validation(format!(
                "confidence_threshold {} outside [0,1]",
                log_threshold
            )));
        }

        let frame = decode_frame(data)?;
        let detections = detect(self.detector.as_ref(), &frame, self.detect_threshold).await?;

        let qualifying: Vec<BoundingBoxDetection> = detections
            .iter()
            .filter(|d| d.confidence >= log_threshold)
            .cloned()
            .collect();

        let (annotated_rel, thumbnail_rel) = if qualifying.is_empty() {
            (None, None)
        } else {
            let stem = self.artifacts.new_stem("live");
            let mut annotated = frame.clone();
            self.annotator.annotate(&mut annotated, &qualifying);
            (
                self.save_annotated_logged(
                    SourceChannel::Live,
                    &format!("{}.jpg", stem),
                    &annotated,
                )
                .await,
                self.save_thumbnail_logged(&stem, &frame).await,
            )
        };

        let mut out = Vec::with_capacity(detections.len());
        let mut logged = 0u32;
        let mut alerted = false;

        for det in &detections {
            let mut record_id = None;
            let is_logged = det.confidence >= log_threshold;

            if is_logged {
                let id = self
                    .store
                    .create(&NewDetection {
                        weapon_type: det.label.clone(),
                        confidence: det.confidence as f64,
                        source: SourceChannel::Live,
                        artifact_path: annotated_rel.clone().unwrap_or_default(),
                        thumbnail_path: thumbnail_rel.clone(),
                    })
                    .await?;

                if !alerted {
                    self.dispatch_alert(&det.label);
                    alerted = true;
                }

                record_id = Some(id);
                logged += 1;
            }

            out.push(LiveDetection {
                weapon_type: det.label.clone(),
                confidence: det.confidence,
                norm_box: det.norm_box,
                logged: is_logged,
                record_id,
            });
        }

        tracing::debug!(
            detections = out.len(),
            logged = logged,
            log_threshold = log_threshold,
            "Live frame processed"
        );

        Ok(LiveOutcome {
            detections: out,
            logged,
        })
    }

    /// Delete every record, then sweep the artifact tree.
    ///
    /// Two explicit steps: the database commit happens first, filesystem
    /// cleanup is best-effort second, and partial cleanup failure is
    /// reported distinctly instead of failing the operation.
    pub async fn clear_all(&self) -> Result<ClearOutcome> {
        let deleted = self.store.delete_all().await?;
        let report = self.artifacts.purge_all().await;

        tracing::info!(
            deleted = deleted,
            files_removed = report.files_removed,
            cleanup_errors = report.errors.len(),
            "All detections cleared"
        );

        Ok(ClearOutcome {
            deleted,
            files_removed: report.files_removed,
            cleanup_errors: report.errors,
        })
    }

    async fn save_annotated_logged(
        &self,
        channel: SourceChannel,
        file_name: &str,
        frame: &RgbImage,
    ) -> Option<String> {
        match self.artifacts.save_annotated(channel, file_name, frame).await {
            Ok(rel) => Some(rel),
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    file_name = %file_name,
                    error = %e,
                    "Failed to save annotated frame"
                );
                None
            }
        }
    }

    async fn save_thumbnail_logged(&self, stem: &str, frame: &RgbImage) -> Option<String> {
        let thumb = self.annotator.thumbnail_from_frame(frame);
        match self.artifacts.save_thumbnail(stem, &thumb).await {
            Ok(rel) => Some(rel),
            Err(e) => {
                tracing::warn!(stem = %stem, error = %e, "Failed to save thumbnail");
                None
            }
        }
    }

    fn dispatch_alert(&self, weapon_type: &str) {
        match self.alert_recipient {
            Some(ref recipient) => self.notifier.notify(recipient, weapon_type),
            None => tracing::debug!(
                weapon_type = %weapon_type,
                "No alert recipient configured, skipping alert"
            ),
        }
    }
}

/// Decode an uploaded frame; failure is a client input error
fn decode_frame(data: &[u8]) -> Result<RgbImage> {
    image::load_from_memory(data)
        .map(|img| img.to_rgb8())
        .map_err(|e| Error::Validation(format!("undecodable frame: {}", e)))
}
