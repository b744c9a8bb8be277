//! Video - Bounded Frame Extraction
//!
//! ## Responsibilities
//!
//! - Dump up to the frame cap from an uploaded video via ffmpeg
//! - Load dumped frames in order for the ingestion pipeline
//!
//! The frame cap bounds worst-case latency per upload, not correctness:
//! weapons first appearing after the cap are missed by design.

use crate::error::{Error, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use uuid::Uuid;

/// Hard timeout for one ffmpeg frame dump
const FFMPEG_TIMEOUT: Duration = Duration::from_secs(60);

/// Extract up to `cap` leading frames from a video file.
///
/// Frames are dumped as JPEGs into a per-request directory under `work_dir`
/// and loaded back in frame order; the dump directory is removed afterwards
/// either way.
pub async fn extract_frames(video_path: &Path, cap: u32, work_dir: &Path) -> Result<Vec<RgbImage>> {
    let dump_dir = work_dir.join(format!("frames_{}", Uuid::new_v4().simple()));
    fs::create_dir_all(&dump_dir).await?;

    let result = dump_and_load(video_path, cap, &dump_dir).await;

    if let Err(e) = fs::remove_dir_all(&dump_dir).await {
        tracing::warn!(
            dir = %dump_dir.display(),
            error = %e,
            "Failed to remove frame dump directory"
        );
    }

    result
}

async fn dump_and_load(video_path: &Path, cap: u32, dump_dir: &Path) -> Result<Vec<RgbImage>> {
    let input = video_path.to_string_lossy().to_string();
    let frames_arg = cap.to_string();
    let pattern = dump_dir.join("frame_%04d.jpg").to_string_lossy().to_string();

    // kill_on_drop: if the timeout cancels the wait, dropping the Child
    // sends SIGKILL so unresponsive ffmpeg processes do not accumulate
    let child = Command::new("ffmpeg")
        .args([
            "-i",
            input.as_str(),
            "-frames:v",
            frames_arg.as_str(),
            "-f",
            "image2",
            "-loglevel",
            "error",
            "-y",
            pattern.as_str(),
        ])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Internal(format!("ffmpeg spawn failed: {}", e)))?;

    match tokio::time::timeout(FFMPEG_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                // ffmpeg rejecting the input means the upload is not a
                // decodable video: a client input error
                return Err(Error::Validation(format!(
                    "unable to decode video: {}",
                    stderr.trim()
                )));
            }
        }
        Ok(Err(e)) => {
            return Err(Error::Internal(format!("ffmpeg execution failed: {}", e)));
        }
        Err(_) => {
            tracing::warn!(
                timeout_sec = FFMPEG_TIMEOUT.as_secs(),
                video = %video_path.display(),
                "ffmpeg timeout, process killed via kill_on_drop"
            );
            return Err(Error::Internal(format!(
                "ffmpeg timeout ({}s)",
                FFMPEG_TIMEOUT.as_secs()
            )));
        }
    }

    read_frames_dir(dump_dir).await
}

/// Load dumped frames in name order (the %04d pattern sorts by frame number)
async fn read_frames_dir(dir: &Path) -> Result<Vec<RgbImage>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jpg") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        frames.push(image::open(path)?.to_rgb8());
    }
    Ok(frames)
}

/// Check if ffmpeg is available
pub async fn check_ffmpeg() -> Result<String> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .map_err(|e| Error::Internal(format!("ffmpeg not found: {}", e)))?;

    if !output.status.success() {
        return Err(Error::Internal("ffmpeg version check failed".to_string()));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    let first_line = version.lines().next().unwrap_or("unknown");
    Ok(first_line.to_string())
}
