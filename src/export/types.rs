//! Video encoding types and configuration
//!
//! This module defines the parameters used to turn staged camera frames into
//! video files, the description of a finished stream, and encoding errors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Supported video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    /// Get the FFmpeg encoder name for this codec
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Av1 => "libsvtav1",
        }
    }

    /// Get the file extension used for this codec
    pub fn extension(&self) -> &'static str {
        "mp4"
    }
}

/// Video encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    /// Encode camera frames after stop. When off, staged frames are kept as is.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_codec")]
    pub codec: VideoCodec,

    /// Constant rate factor. Lower values = higher quality, larger files
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Playback frame rate of the encoded video
    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Keyframe interval in frames
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,

    /// FFmpeg program to run
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

fn default_enabled() -> bool {
    true
}

fn default_codec() -> VideoCodec {
    VideoCodec::H264
}

fn default_crf() -> u8 {
    23
}

fn default_fps() -> u32 {
    30
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_keyframe_interval() -> u32 {
    2
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            codec: default_codec(),
            crf: default_crf(),
            fps: default_fps(),
            pixel_format: default_pixel_format(),
            keyframe_interval: default_keyframe_interval(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl VideoConfig {
    pub fn validate(&self) -> Result<(), EncodingError> {
        if self.fps == 0 {
            return Err(EncodingError::InvalidConfig("fps must be > 0".to_string()));
        }
        if self.crf > 63 {
            return Err(EncodingError::InvalidConfig(format!(
                "crf {} out of range 0-63",
                self.crf
            )));
        }
        if self.keyframe_interval == 0 {
            return Err(EncodingError::InvalidConfig(
                "keyframe interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A finished video for one camera source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedStream {
    pub source: String,
    pub path: PathBuf,
    pub frame_count: u64,
    /// Playback duration at the configured frame rate
    pub duration_secs: f64,
}

/// Per-source encoding errors
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("No frames staged for '{0}'")]
    NoFrames(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Encoding task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_encoders() {
        assert_eq!(VideoCodec::H264.encoder(), "libx264");
        assert_eq!(VideoCodec::H265.encoder(), "libx265");
        assert_eq!(VideoCodec::Av1.encoder(), "libsvtav1");
    }

    #[test]
    fn test_validate_rejects_zero_fps() {
        let config = VideoConfig {
            fps: 0,
            ..VideoConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EncodingError::InvalidConfig(_))
        ));
        assert!(VideoConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_deserializes_partial_json() {
        let config: VideoConfig = serde_json::from_str(r#"{ "codec": "h265", "crf": 18 }"#).unwrap();
        assert_eq!(config.codec, VideoCodec::H265);
        assert_eq!(config.crf, 18);
        assert_eq!(config.fps, 30);
        assert_eq!(config.pixel_format, "yuv420p");
        assert!(config.enabled);

        let config: VideoConfig = serde_json::from_str(r#"{ "enabled": false }"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.codec, VideoCodec::H264);
    }
}
