//! Persisted session schema
//!
//! Serde types for the human-readable documents written next to the array
//! store: the per-group `meta.json` and the session-level `session.json`.

use crate::capture::SourceKind;
use crate::export::{EncodedStream, VideoCodec, VideoConfig};
use crate::recorder::state::{ReportedError, SessionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current session document version
pub const SESSION_VERSION: u32 = 1;

// =============================================================================
// Group metadata
// =============================================================================

/// Metadata stored alongside each source's arrays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMeta {
    /// Source name before path encoding
    pub name: String,
    pub kind: SourceKind,
    pub nominal_frequency: f64,
    /// Realized number of samples (frames for cameras)
    pub sample_count: usize,
    /// Per-sample payload dimensions; empty for scalars and cameras
    #[serde(default)]
    pub shape: Vec<usize>,
    /// Whether the data file carries a payload column
    pub has_payload: bool,
}

// =============================================================================
// Session metadata
// =============================================================================

/// Encoding parameters recorded with the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    /// Whether camera frames were encoded after stop
    pub enabled: bool,
    pub codec: VideoCodec,
    pub encoder: String,
    pub crf: u8,
    pub fps: u32,
    pub pixel_format: String,
    pub keyframe_interval: u32,
}

impl From<&VideoConfig> for VideoParams {
    fn from(config: &VideoConfig) -> Self {
        Self {
            enabled: config.enabled,
            codec: config.codec,
            encoder: config.codec.encoder().to_string(),
            crf: config.crf,
            fps: config.fps,
            pixel_format: config.pixel_format.clone(),
            keyframe_interval: config.keyframe_interval,
        }
    }
}

/// Session-level entry for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub kind: SourceKind,
    pub nominal_frequency: f64,
    pub enabled: bool,
    pub sample_count: usize,
    pub failed_polls: u64,
    /// Store group directory, relative to the session root
    pub group: String,
    /// Encoded video, for camera sources that encoded successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<EncodedStream>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ReportedError>,
}

/// Contents of `session.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub version: u32,
    pub session_id: String,
    pub status: SessionState,
    pub started_at: DateTime<Utc>,
    pub started_at_unix_ms: i64,
    pub duration_secs: f64,
    pub sources: BTreeMap<String, SourceEntry>,
    pub video: VideoParams,
}
