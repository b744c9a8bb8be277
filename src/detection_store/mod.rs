//! DetectionStore - Detection Event Persistence
//!
//! ## Responsibilities
//!
//! - Persist detection records to SQLite (detections table)
//! - Query interface for the recent-events listing and stats
//! - Bulk delete for the clear-all operation
//!
//! The table is append-only: records are created once per accepted detection
//! event and never updated; the only delete path is `delete_all`.

use crate::error::{Error, Result};
use crate::models::SourceChannel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// Review status written on every new record
pub const DEFAULT_STATUS: &str = "verified";

/// New detection event, not yet persisted
#[derive(Debug, Clone)]
pub struct NewDetection {
    pub weapon_type: String,
    pub confidence: f64,
    pub source: SourceChannel,
    /// Evidentiary artifact path, relative to the artifact root
    pub artifact_path: String,
    /// Thumbnail path, relative to the artifact root; absent when
    /// thumbnailing failed
    pub thumbnail_path: Option<String>,
}

/// Persisted detection record (matches detections table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub weapon_type: String,
    pub confidence: f64,
    pub source: SourceChannel,
    pub artifact_path: String,
    pub thumbnail_path: Option<String>,
    pub status: String,
}

/// Per-channel record counts for the stats endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionStats {
    pub total: i64,
    pub image: i64,
    pub video: i64,
    pub live: i64,
}

/// DetectionStore instance
#[derive(Clone)]
pub struct DetectionStore {
    pool: SqlitePool,
}

impl DetectionStore {
    /// Create new DetectionStore
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the detections table if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                weapon_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                source TEXT NOT NULL,
                artifact_path TEXT NOT NULL,
                thumbnail_path TEXT,
                status TEXT NOT NULL DEFAULT 'verified'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_detections_created_at ON detections(created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert one detection record, returning its id.
    ///
    /// Validates the record invariants (confidence in [0,1]) before writing.
    pub async fn create(&self, new: &NewDetection) -> Result<i64> {
        if !(0.0..=1.0).contains(&new.confidence) {
            return Err(Error::Validation(format!(
                "confidence {} outside [0,1]",
                new.confidence
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO detections (
                created_at, weapon_type, confidence, source,
                artifact_path, thumbnail_path, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(&new.weapon_type)
        .bind(new.confidence)
        .bind(new.source.as_str())
        .bind(&new.artifact_path)
        .bind(&new.thumbnail_path)
        .bind(DEFAULT_STATUS)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();

        tracing::info!(
            id = id,
            weapon_type = %new.weapon_type,
            confidence = new.confidence,
            source = %new.source,
            "Detection record saved"
        );

        Ok(id)
    }

    /// Get the most recent detection records, newest first
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<DetectionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, weapon_type, confidence, source,
                   artifact_path, thumbnail_path, status
            FROM detections
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Delete every record, returning the row count
    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM detections")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Total and per-channel record counts
    pub async fn count_by_source(&self) -> Result<DetectionStats> {
        let rows = sqlx::query("SELECT source, COUNT(*) AS count FROM detections GROUP BY source")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = DetectionStats::default();
        for row in rows {
            let source: String = row.try_get("source")?;
            let count: i64 = row.try_get("count")?;
            stats.total += count;
            match SourceChannel::parse(&source) {
                Some(SourceChannel::Image) => stats.image = count,
                Some(SourceChannel::Video) => stats.video = count,
                Some(SourceChannel::Live) => stats.live = count,
                None => {}
            }
        }

        Ok(stats)
    }
}

/// Convert database row to DetectionRecord
fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<DetectionRecord> {
    let source_str: String = row.try_get("source")?;
    let source = SourceChannel::parse(&source_str)
        .ok_or_else(|| Error::Internal(format!("unknown source channel: {}", source_str)))?;

    Ok(DetectionRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        weapon_type: row.try_get("weapon_type")?,
        confidence: row.try_get("confidence")?,
        source,
        artifact_path: row.try_get("artifact_path")?,
        thumbnail_path: row.try_get("thumbnail_path")?,
        status: row.try_get("status")?,
    })
}
