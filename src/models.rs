//! Shared models and types for Armwatch
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub detector_connected: bool,
    pub db_connected: bool,
}

/// Origin of an upload: still image, video file, or live camera frame.
///
/// Persisted as its lowercase name; part of the artifact URL layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceChannel {
    Image,
    Video,
    Live,
}

impl SourceChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceChannel::Image => "image",
            SourceChannel::Video => "video",
            SourceChannel::Live => "live",
        }
    }

    /// Parse from the persisted column value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(SourceChannel::Image),
            "video" => Some(SourceChannel::Video),
            "live" => Some(SourceChannel::Live),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
