//! Detector - Inference Sidecar Adapter
//!
//! ## Responsibilities
//!
//! - Send frames to the detection sidecar
//! - Parse model hypotheses (label id, confidence, normalized box)
//! - Apply the confidence threshold and derive pixel boxes
//!
//! The sidecar owns the pretrained model and its id->name label table; this
//! module treats it as a black box reachable over HTTP. Handlers receive the
//! capability as `Arc<dyn Detector>` so tests can substitute a scripted fake.

use crate::annotator::encode_jpeg;
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::RgbImage;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default confidence cutoff for what counts as detected at all
pub const DEFAULT_THRESHOLD: f32 = 0.75;

/// Normalized box from the sidecar, coordinates relative to frame dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One raw model hypothesis, before thresholding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: NormBox,
}

/// Sidecar response for `/v1/detect`
#[derive(Debug, Clone, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
}

/// One detection that cleared the threshold, normalized for the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct BoundingBoxDetection {
    /// Weapon label resolved from the model's id->name table
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` relative to frame dimensions, each in [0,1]
    pub norm_box: [f32; 4],
    /// `[x1, y1, x2, y2]` in frame pixel coordinates, clamped to bounds
    pub pixel_box: [u32; 4],
}

impl BoundingBoxDetection {
    /// Build from a raw hypothesis, deriving the pixel box for a frame size
    fn from_raw(raw: &RawDetection, label: String, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let clamp_x = |v: i64| v.clamp(0, width as i64 - 1) as u32;
        let clamp_y = |v: i64| v.clamp(0, height as i64 - 1) as u32;

        Self {
            label,
            confidence: raw.confidence,
            norm_box: [raw.bbox.x1, raw.bbox.y1, raw.bbox.x2, raw.bbox.y2],
            pixel_box: [
                clamp_x((raw.bbox.x1 * w).floor() as i64),
                clamp_y((raw.bbox.y1 * h).floor() as i64),
                clamp_x((raw.bbox.x2 * w).ceil() as i64),
                clamp_y((raw.bbox.y2 * h).ceil() as i64),
            ],
        }
    }
}

/// Black-box detection capability
#[async_trait]
pub trait Detector: Send + Sync {
    /// Run inference on an encoded JPEG frame.
    ///
    /// Returns every model hypothesis in model order, unthresholded.
    async fn infer(&self, jpeg: &[u8]) -> Result<Vec<RawDetection>>;

    /// Resolve a class id through the model's label table
    fn label(&self, class_id: u32) -> String;

    /// Check sidecar reachability
    async fn health_check(&self) -> bool;
}

/// Run detection on a decoded frame.
///
/// Pure with respect to the frame: encodes, calls the detector, keeps the
/// hypotheses with confidence >= threshold in model order, and derives
/// clamped pixel boxes from the frame dimensions. No retry or fallback; a
/// sidecar failure surfaces to the caller.
pub async fn detect(
    detector: &dyn Detector,
    frame: &RgbImage,
    threshold: f32,
) -> Result<Vec<BoundingBoxDetection>> {
    let jpeg = encode_jpeg(frame)?;
    let raw = detector.infer(&jpeg).await?;

    Ok(raw
        .iter()
        .filter(|r| r.confidence >= threshold)
        .map(|r| {
            BoundingBoxDetection::from_raw(
                r,
                detector.label(r.class_id),
                frame.width(),
                frame.height(),
            )
        })
        .collect())
}

/// HTTP detector client against the inference sidecar
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
    labels: Vec<String>,
}

impl HttpDetector {
    /// Connect to the sidecar and fetch its label table.
    ///
    /// A label fetch failure is logged and degrades to `class_<id>` naming;
    /// inference itself is not attempted until the first request.
    pub async fn connect(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        let labels = match Self::fetch_labels(&client, &base_url).await {
            Ok(labels) => {
                tracing::info!(count = labels.len(), "Loaded model label table");
                labels
            }
            Err(e) => {
                tracing::warn!(error = %e, "Label table fetch failed, using class ids");
                Vec::new()
            }
        };

        Self {
            client,
            base_url,
            labels,
        }
    }

    async fn fetch_labels(client: &reqwest::Client, base_url: &str) -> Result<Vec<String>> {
        let url = format!("{}/v1/labels", base_url);
        let resp = client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Detector(format!(
                "label fetch failed: {}",
                resp.status()
            )));
        }

        let labels: Vec<String> = resp.json().await?;
        Ok(labels)
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn infer(&self, jpeg: &[u8]) -> Result<Vec<RawDetection>> {
        let url = format!("{}/v1/detect", self.base_url);

        let form = Form::new().part(
            "frame",
            Part::bytes(jpeg.to_vec())
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Detector(format!(
                "inference failed: {} - {}",
                status,
                body.trim()
            )));
        }

        let result: DetectResponse = resp.json().await?;
        Ok(result.detections)
    }

    fn label(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector {
        detections: Vec<RawDetection>,
        labels: Vec<String>,
    }

    #[async_trait]
    impl Detector for FixedDetector {
        async fn infer(&self, _jpeg: &[u8]) -> Result<Vec<RawDetection>> {
            Ok(self.detections.clone())
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

    fn raw(class_id: u32, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox: NormBox {
                x1: bbox[0],
                y1: bbox[1],
                x2: bbox[2],
                y2: bbox[3],
            },
        }
    }

    #[tokio::test]
    async fn test_detect_threshold_subset_in_model_order() {
        let detector = FixedDetector {
            detections: vec![
                raw(0, 0.91, [0.1, 0.1, 0.3, 0.3]),
                raw(1, 0.60, [0.2, 0.2, 0.4, 0.4]),
                raw(0, 0.80, [0.5, 0.5, 0.7, 0.7]),
                raw(1, 0.75, [0.6, 0.1, 0.9, 0.4]),
            ],
            labels: vec!["knife".to_string(), "pistol".to_string()],
        };
        let frame = RgbImage::new(100, 100);

        let hits = detect(&detector, &frame, 0.75).await.unwrap();
        let labels: Vec<_> = hits.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["knife", "knife", "pistol"]);
        assert!(hits.iter().all(|d| d.confidence >= 0.75));

        // Lower threshold keeps everything, still in model order
        let all = detect(&detector, &frame, 0.0).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[1].label, "pistol");
    }

    #[tokio::test]
    async fn test_pixel_box_derivation_and_clamp() {
        let detector = FixedDetector {
            detections: vec![raw(0, 0.9, [0.25, 0.5, 1.2, 1.0])],
            labels: vec!["rifle".to_string()],
        };
        let frame = RgbImage::new(200, 100);

        let hits = detect(&detector, &frame, 0.5).await.unwrap();
        assert_eq!(hits[0].pixel_box, [50, 50, 199, 99]);
        assert_eq!(hits[0].norm_box, [0.25, 0.5, 1.2, 1.0]);
    }

    #[tokio::test]
    async fn test_unknown_class_id_falls_back() {
        let detector = FixedDetector {
            detections: vec![raw(7, 0.9, [0.0, 0.0, 0.5, 0.5])],
            labels: vec!["knife".to_string()],
        };
        let frame = RgbImage::new(10, 10);

        let hits = detect(&detector, &frame, 0.5).await.unwrap();
        assert_eq!(hits[0].label, "class_7");
    }

    #[test]
    fn test_raw_detection_wire_format() {
        let json = r#"{"class_id": 2, "confidence": 0.88, "box": {"x1": 0.1, "y1": 0.2, "x2": 0.3, "y2": 0.4}}"#;
        let det: RawDetection = serde_json::from_str(json).unwrap();
        assert_eq!(det.class_id, 2);
        assert_eq!(det.bbox.y2, 0.4);
    }
}
