//! Session directory layout
//!
//! A saved session is a directory containing:
//! - session.json: start time, per-source counts, video parameters
//! - store/<source>/: one group per source (data.parquet + meta.json)
//! - videos/<source>.mp4: one video per camera source
//! - frames/<source>/: staged camera frames, removed after a successful encode

use super::schema::SessionMetadata;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const METADATA_FILE: &str = "session.json";
pub const GROUP_DATA_FILE: &str = "data.parquet";
pub const GROUP_META_FILE: &str = "meta.json";

/// Session directory errors
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Missing required file: {0}")]
    MissingFile(String),
}

/// Turn a source name into a single safe path segment
pub fn encode_name(name: &str) -> String {
    let encoded = urlencoding::encode(name).into_owned();
    match encoded.as_str() {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => encoded,
    }
}

/// Paths inside a session directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Group directory relative to the session root
    pub fn group_relative(name: &str) -> String {
        format!("store/{}", encode_name(name))
    }

    pub fn group_dir(&self, name: &str) -> PathBuf {
        self.store_dir().join(encode_name(name))
    }

    pub fn frames_dir(&self, name: &str) -> PathBuf {
        self.root.join("frames").join(encode_name(name))
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn video_path(&self, name: &str, extension: &str) -> PathBuf {
        self.videos_dir()
            .join(format!("{}.{}", encode_name(name), extension))
    }
}

/// Read `session.json` from a session directory
pub fn read_metadata(session_dir: &Path) -> Result<SessionMetadata, BundleError> {
    if !session_dir.is_dir() {
        return Err(BundleError::InvalidSession(format!(
            "{:?} is not a directory",
            session_dir
        )));
    }

    let path = session_dir.join(METADATA_FILE);
    if !path.exists() {
        return Err(BundleError::MissingFile(METADATA_FILE.to_string()));
    }

    let content = fs::read_to_string(&path)?;
    let metadata: SessionMetadata = serde_json::from_str(&content)?;

    tracing::debug!(
        "Loaded session {} ({} sources) from {:?}",
        metadata.session_id,
        metadata.sources.len(),
        session_dir
    );
    Ok(metadata)
}

/// Write `session.json` atomically
pub fn write_metadata(metadata: &SessionMetadata, session_dir: &Path) -> Result<(), BundleError> {
    fs::create_dir_all(session_dir)?;

    let content = serde_json::to_string_pretty(metadata)?;
    let path = session_dir.join(METADATA_FILE);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, &path)?;

    tracing::debug!("Saved session metadata to {:?}", path);
    Ok(())
}

/// Check if a path looks like a saved session
pub fn is_valid_session(path: &Path) -> bool {
    path.is_dir() && path.join(METADATA_FILE).exists()
}
