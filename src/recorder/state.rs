//! Recording state management
//!
//! Defines the session state machine, source configuration and the final
//! collection report.

use crate::capture::SourceKind;
use crate::export::{EncodedStream, VideoConfig};
use crate::utils::error::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current state of a collection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Sources may be registered, nothing is sampling yet
    Idle,
    /// Samplers are running
    Running,
    /// Stop was requested; joining workers and flushing
    Stopping,
    /// Data persisted. Terminal.
    Saved,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Registration parameters for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Unique key within the session
    pub name: String,
    pub kind: SourceKind,
    /// Target sampling frequency in Hz
    pub frequency: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, kind: SourceKind, frequency: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            frequency,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Nominal interval between tick starts.
    ///
    /// `None` when the frequency has no representable, non-zero period.
    pub fn period(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / self.frequency)
            .ok()
            .filter(|period| !period.is_zero())
    }
}

/// Configuration for a collection session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorConfig {
    /// Session directory; store, videos and metadata are written here
    pub output_dir: PathBuf,

    /// Upper bound on waiting for all samplers to exit after stop
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Encoding parameters for camera sources
    #[serde(default)]
    pub video: VideoConfig,
}

fn default_join_timeout_ms() -> u64 {
    3000
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data"),
            join_timeout_ms: default_join_timeout_ms(),
            video: VideoConfig::default(),
        }
    }
}

impl CollectorConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CollectorConfig = serde_json::from_str(&content)?;
        tracing::debug!("Loaded collector config from {:?}", path);
        Ok(config)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Codes carried by [`ReportedError`]
pub mod codes {
    pub const SOURCE_FAILURE: &str = "SOURCE_FAILURE";
    pub const SHUTDOWN_TIMEOUT: &str = "SHUTDOWN_TIMEOUT";
    pub const WORKER_PANICKED: &str = "WORKER_PANICKED";
    pub const PERSISTENCE_ERROR: &str = "PERSISTENCE_ERROR";
    pub const ENCODING_ERROR: &str = "ENCODING_ERROR";
    pub const METADATA_ERROR: &str = "METADATA_ERROR";
}

/// Machine-readable error code plus message, as surfaced in reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedError {
    pub code: String,
    pub message: String,
}

impl ReportedError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Per-source outcome of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub name: String,
    pub kind: SourceKind,
    pub nominal_frequency: f64,
    pub enabled: bool,
    /// Samples (or frames) retained for this source
    pub sample_count: usize,
    /// Ticks attempted by the sampler
    pub ticks: u64,
    /// Polls that failed and were skipped
    pub failed_polls: u64,
    pub errors: Vec<ReportedError>,
}

impl SourceReport {
    /// Realized sampling rate over the session duration
    pub fn realized_frequency(&self, duration: Duration) -> f64 {
        let secs = duration.as_secs_f64();
        if secs > 0.0 {
            self.sample_count as f64 / secs
        } else {
            0.0
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Result of a completed session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Time between start and the stop broadcast
    pub duration_secs: f64,
    pub sources: Vec<SourceReport>,
    pub encoded: Vec<EncodedStream>,
    /// Failures not tied to one source, such as writing `session.json`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ReportedError>,
}

impl SessionReport {
    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs)
    }

    /// Whether the session and every source finished without a reported error
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.sources.iter().all(|s| !s.has_errors())
    }

    pub fn total_samples(&self) -> usize {
        self.sources.iter().map(|s| s.sample_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_source_period() {
        let config = SourceConfig::new("joint_pos", SourceKind::Sensor, 50.0);
        assert_eq!(config.period(), Some(Duration::from_millis(20)));
        assert!(config.enabled);
        assert!(!config.disabled().enabled);
    }

    #[test]
    fn test_unrepresentable_period() {
        assert_eq!(SourceConfig::new("slow", SourceKind::Sensor, 1e-30).period(), None);
        assert_eq!(SourceConfig::new("fast", SourceKind::Sensor, 1e300).period(), None);
        assert_eq!(
            SourceConfig::new("slow_ok", SourceKind::Sensor, 0.5).period(),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("collector.json");
        std::fs::write(&path, r#"{ "outputDir": "/tmp/run" }"#).unwrap();

        let config = CollectorConfig::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/run"));
        assert_eq!(config.join_timeout_ms, 3000);
        assert_eq!(config.video.crf, 23);
    }

    #[test]
    fn test_realized_frequency() {
        let report = SourceReport {
            name: "imu".to_string(),
            kind: SourceKind::Sensor,
            nominal_frequency: 100.0,
            enabled: true,
            sample_count: 50,
            ticks: 50,
            failed_polls: 0,
            errors: Vec::new(),
        };
        assert_eq!(report.realized_frequency(Duration::from_secs(1)), 50.0);
        assert_eq!(report.realized_frequency(Duration::ZERO), 0.0);
    }
}
