//! Capture trait definitions
//!
//! Driver-agnostic types for telemetry sources. A concrete driver (joint
//! encoder, teleop rig, camera) only has to produce one payload per call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a telemetry source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Proprioceptive or environmental sensor (joint positions, tactile, IMU)
    Sensor,
    /// Controller or teleoperation commands
    Controller,
    /// Image source; frames are video-encoded instead of stored as arrays
    Camera,
}

impl SourceKind {
    /// Whether payloads of this kind are images
    pub fn is_image(&self) -> bool {
        matches!(self, SourceKind::Camera)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Sensor => "sensor",
            SourceKind::Controller => "controller",
            SourceKind::Camera => "camera",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel layout of a raw image frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub(crate) fn png_color(&self) -> png::ColorType {
        match self {
            PixelFormat::Gray8 => png::ColorType::Grayscale,
            PixelFormat::Rgb8 => png::ColorType::Rgb,
            PixelFormat::Rgba8 => png::ColorType::Rgba,
        }
    }
}

/// A single raw camera frame
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major pixel data, `width * height * channels` bytes
    pub data: Vec<u8>,
}

impl ImageFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    /// Expected length of `data` for the declared dimensions
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }
}

/// One value produced by a source
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Scalar(f64),
    Vector(Vec<f64>),
    Image(ImageFrame),
}

impl Payload {
    pub fn is_image(&self) -> bool {
        matches!(self, Payload::Image(_))
    }

    /// Short name of the payload variant, used in log messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Scalar(_) => "scalar",
            Payload::Vector(_) => "vector",
            Payload::Image(_) => "image",
        }
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Scalar(value)
    }
}

impl From<Vec<f64>> for Payload {
    fn from(values: Vec<f64>) -> Self {
        Payload::Vector(values)
    }
}

impl From<ImageFrame> for Payload {
    fn from(frame: ImageFrame) -> Self {
        Payload::Image(frame)
    }
}

/// A single failed poll. Non-fatal: the tick is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Device not ready: {0}")]
    NotReady(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),
}

/// Capability implemented by every driver: produce the next payload or fail.
///
/// `poll` runs on the source's own sampling thread and may block. A call that
/// never returns cannot be interrupted; the supervisor abandons the worker
/// after the join timeout.
pub trait Source: Send + 'static {
    fn poll(&mut self) -> Result<Payload, SourceError>;
}

impl<F> Source for F
where
    F: FnMut() -> Result<Payload, SourceError> + Send + 'static,
{
    fn poll(&mut self) -> Result<Payload, SourceError> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_source() {
        let mut counter = 0.0;
        let mut source = move || -> Result<Payload, SourceError> {
            counter += 1.0;
            Ok(Payload::Scalar(counter))
        };
        assert_eq!(Source::poll(&mut source).unwrap(), Payload::Scalar(1.0));
        assert_eq!(Source::poll(&mut source).unwrap(), Payload::Scalar(2.0));
    }

    #[test]
    fn test_frame_expected_len() {
        let frame = ImageFrame::new(4, 2, PixelFormat::Rgb8, vec![0; 24]);
        assert_eq!(frame.expected_len(), 24);
        assert!(Payload::from(frame).is_image());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&SourceKind::Controller).unwrap();
        assert_eq!(json, "\"controller\"");
        assert!(SourceKind::Camera.is_image());
        assert!(!SourceKind::Sensor.is_image());
    }
}
