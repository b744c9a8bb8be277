//! ArtifactStore - Evidence Image Tree
//!
//! ## Responsibilities
//!
//! - Own the artifact directory layout (thumbnails + per-channel annotated logs)
//! - Generate collision-free artifact file names
//! - Save encoded frames to disk
//! - Bulk purge for the clear-all operation
//!
//! Layout (URLs are derived from relative paths, so this is a contract):
//!
//! ```text
//! <root>/thumbnails/thumb_<stem>.jpg
//! <root>/annotated/{image,video,live}/<stem>.jpg
//! ```

use crate::annotator::encode_jpeg;
use crate::error::Result;
use crate::models::SourceChannel;
use chrono::Utc;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Outcome of a bulk purge. Partial failure is reported, not swallowed.
#[derive(Debug, Clone, Default)]
pub struct PurgeReport {
    /// Files removed
    pub files_removed: u64,
    /// Per-file failures, as display strings
    pub errors: Vec<String>,
}

/// ArtifactStore instance
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create the store and its directory tree
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(root.join("thumbnails")).await?;
        for channel in [SourceChannel::Image, SourceChannel::Video, SourceChannel::Live] {
            fs::create_dir_all(root.join("annotated").join(channel.as_str())).await?;
        }
        Ok(Self { root })
    }

    /// Artifact tree root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generate a unique file stem for one upload: UTC timestamp, a uuid
    /// fragment (concurrent uploads within one second must not collide), and
    /// the sanitized upload name.
    pub fn new_stem(&self, upload_name: &str) -> String {
        let ts = Utc::now().format("%Y%m%d%H%M%S");
        let tag = Uuid::new_v4().simple().to_string();
        let name = sanitize_stem(upload_name);
        if name.is_empty() {
            format!("{}_{}", ts, &tag[..8])
        } else {
            format!("{}_{}_{}", ts, &tag[..8], name)
        }
    }

    /// Save an annotated frame under the channel's log folder.
    ///
    /// Returns the path relative to the artifact root.
    pub async fn save_annotated(
        &self,
        channel: SourceChannel,
        file_name: &str,
        frame: &RgbImage,
    ) -> Result<String> {
        let rel = format!("annotated/{}/{}", channel.as_str(), file_name);
        self.write_jpeg(&rel, frame).await?;
        Ok(rel)
    }

    /// Save a thumbnail. Returns the path relative to the artifact root.
    pub async fn save_thumbnail(&self, stem: &str, thumb: &RgbImage) -> Result<String> {
        let rel = format!("thumbnails/thumb_{}.jpg", stem);
        self.write_jpeg(&rel, thumb).await?;
        Ok(rel)
    }

    async fn write_jpeg(&self, rel: &str, frame: &RgbImage) -> Result<()> {
        let data = encode_jpeg(frame)?;
        let path = self.root.join(rel);
        fs::write(&path, &data).await?;

        tracing::debug!(
            path = %path.display(),
            size = data.len(),
            "Saved artifact"
        );
        Ok(())
    }

    /// Absolute path for a stored relative artifact path
    pub fn absolute(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Public URL for a stored relative artifact path
    pub fn url_for(rel: &str) -> String {
        format!("/{}", rel)
    }

    /// Remove every file under the managed directories.
    ///
    /// Best-effort: a file that cannot be removed is recorded in the report
    /// and the sweep continues. Directories themselves are kept.
    pub async fn purge_all(&self) -> PurgeReport {
        let mut report = PurgeReport::default();

        let mut dirs = vec![self.root.join("thumbnails")];
        for channel in [SourceChannel::Image, SourceChannel::Video, SourceChannel::Live] {
            dirs.push(self.root.join("annotated").join(channel.as_str()));
        }

        for dir in dirs {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    report
                        .errors
                        .push(format!("{}: {}", dir.display(), e));
                    continue;
                }
            };

            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        if !path.is_file() {
                            continue;
                        }
                        match fs::remove_file(&path).await {
                            Ok(()) => report.files_removed += 1,
                            Err(e) => {
                                tracing::warn!(
                                    path = %path.display(),
                                    error = %e,
                                    "Failed to remove artifact during purge"
                                );
                                report.errors.push(format!("{}: {}", path.display(), e));
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        report.errors.push(format!("{}: {}", dir.display(), e));
                        break;
                    }
                }
            }
        }

        tracing::info!(
            files_removed = report.files_removed,
            errors = report.errors.len(),
            "Artifact purge completed"
        );

        report
    }
}

/// Keep the stem of an upload name and strip anything path-like or unsafe
fn sanitize_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("holdup.jpg"), "holdup");
        assert_eq!(sanitize_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_stem("cam 1 (front).png"), "cam_1__front_");
        assert_eq!(sanitize_stem(""), "");
    }

    #[test]
    fn test_url_derivation() {
        assert_eq!(
            ArtifactStore::url_for("thumbnails/thumb_x.jpg"),
            "/thumbnails/thumb_x.jpg"
        );
        assert_eq!(
            ArtifactStore::url_for("annotated/video/x_frame0003.jpg"),
            "/annotated/video/x_frame0003.jpg"
        );
    }

    #[tokio::test]
    async fn test_save_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf()).await.unwrap();

        let frame = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let rel = store
            .save_annotated(SourceChannel::Image, "a.jpg", &frame)
            .await
            .unwrap();
        assert_eq!(rel, "annotated/image/a.jpg");
        assert!(store.absolute(&rel).is_file());

        let thumb_rel = store.save_thumbnail("a", &frame).await.unwrap();
        assert_eq!(thumb_rel, "thumbnails/thumb_a.jpg");
        assert!(store.absolute(&thumb_rel).is_file());

        let report = store.purge_all().await;
        assert_eq!(report.files_removed, 2);
        assert!(report.errors.is_empty());
        assert!(!store.absolute(&rel).exists());
        assert!(!store.absolute(&thumb_rel).exists());

        // Purging an empty tree is a no-op
        let report = store.purge_all().await;
        assert_eq!(report.files_removed, 0);
    }

    #[tokio::test]
    async fn test_stems_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf()).await.unwrap();
        let a = store.new_stem("same.jpg");
        let b = store.new_stem("same.jpg");
        assert_ne!(a, b);
        assert!(a.ends_with("_same"));
    }
}
