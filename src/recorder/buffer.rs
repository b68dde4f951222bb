//! Per-source timestamped buffers
//!
//! Numeric sources accumulate samples in memory. Camera sources stage every
//! frame as a PNG file on disk so memory stays flat regardless of run length.
//! Each buffer has exactly one writer (its sampler) and one reader (the
//! supervisor at flush time).

use crate::capture::{ImageFrame, Payload, PixelFormat, SourceKind};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reasons a sample is rejected by its buffer
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("timestamp {current:?} is not after previous {previous:?}")]
    NonIncreasingTimestamp { previous: Duration, current: Duration },

    #[error("buffer is sealed")]
    Sealed,

    #[error("{kind} source produced a {payload} payload")]
    KindMismatch {
        kind: SourceKind,
        payload: &'static str,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("frame staging failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame encoding failed: {0}")]
    Png(#[from] png::EncodingError),
}

/// One timestamped value
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub source: Arc<str>,
    /// Offset from session start
    pub timestamp: Duration,
    pub payload: Payload,
}

/// Layout shared by every payload of a numeric source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Scalar,
    Vector(usize),
}

impl PayloadShape {
    fn of(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Scalar(_) => Some(PayloadShape::Scalar),
            Payload::Vector(v) => Some(PayloadShape::Vector(v.len())),
            Payload::Image(_) => None,
        }
    }

    /// Per-sample dimensions, empty for scalars
    pub fn dims(&self) -> Vec<usize> {
        match self {
            PayloadShape::Scalar => Vec::new(),
            PayloadShape::Vector(n) => vec![*n],
        }
    }
}

/// In-memory ordered samples for a sensor or controller
#[derive(Debug)]
pub struct SampleBuffer {
    source: Arc<str>,
    samples: Vec<Sample>,
    shape: Option<PayloadShape>,
}

impl SampleBuffer {
    fn new(source: Arc<str>) -> Self {
        Self {
            source,
            samples: Vec::new(),
            shape: None,
        }
    }

    fn push(&mut self, timestamp: Duration, payload: Payload) -> Result<(), BufferError> {
        let shape = PayloadShape::of(&payload)
            .ok_or_else(|| BufferError::ShapeMismatch("image in numeric buffer".to_string()))?;

        if shape == PayloadShape::Vector(0) {
            return Err(BufferError::ShapeMismatch("empty vector".to_string()));
        }

        match self.shape {
            Some(expected) if expected != shape => {
                return Err(BufferError::ShapeMismatch(format!(
                    "expected {:?}, got {:?}",
                    expected, shape
                )));
            }
            Some(_) => {}
            None => self.shape = Some(shape),
        }

        self.samples.push(Sample {
            source: self.source.clone(),
            timestamp,
            payload,
        });
        Ok(())
    }
}

/// On-disk staging of raw camera frames
#[derive(Debug)]
pub struct FrameStore {
    dir: PathBuf,
    timestamps: Vec<Duration>,
    layout: Option<(u32, u32, PixelFormat)>,
}

impl FrameStore {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            timestamps: Vec::new(),
            layout: None,
        }
    }

    /// printf-style pattern of staged frame names, as consumed by FFmpeg
    pub const FRAME_PATTERN: &'static str = "frame_%06d.png";

    /// File name of the frame at `index`; matches [`Self::FRAME_PATTERN`]
    pub fn frame_file_name(index: usize) -> String {
        format!("frame_{:06}.png", index)
    }

    fn push(&mut self, timestamp: Duration, frame: &ImageFrame) -> Result<(), BufferError> {
        if frame.data.len() != frame.expected_len() {
            return Err(BufferError::ShapeMismatch(format!(
                "frame has {} bytes, {}x{} {:?} needs {}",
                frame.data.len(),
                frame.width,
                frame.height,
                frame.format,
                frame.expected_len()
            )));
        }

        let layout = (frame.width, frame.height, frame.format);
        match self.layout {
            Some(expected) if expected != layout => {
                return Err(BufferError::ShapeMismatch(format!(
                    "frame layout changed from {:?} to {:?}",
                    expected, layout
                )));
            }
            Some(_) => {}
            None => {
                fs::create_dir_all(&self.dir)?;
                self.layout = Some(layout);
            }
        }

        let path = self.dir.join(Self::frame_file_name(self.timestamps.len()));
        write_png(&path, frame)?;
        self.timestamps.push(timestamp);
        Ok(())
    }
}

fn write_png(path: &Path, frame: &ImageFrame) -> Result<(), BufferError> {
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
    encoder.set_color(frame.format.png_color());
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Fast);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(&frame.data)?;
    writer.finish()?;
    Ok(())
}

enum Storage {
    Samples(SampleBuffer),
    Frames(FrameStore),
}

/// Buffer for one source, numeric or image depending on its kind
pub struct SourceBuffer {
    kind: SourceKind,
    storage: Storage,
    last_timestamp: Option<Duration>,
    sealed: bool,
}

/// Contents of a buffer after sealing
#[derive(Debug)]
pub enum SealedBuffer {
    Samples {
        samples: Vec<Sample>,
        shape: Option<PayloadShape>,
    },
    Frames {
        dir: PathBuf,
        timestamps: Vec<Duration>,
    },
}

impl SealedBuffer {
    pub fn len(&self) -> usize {
        match self {
            SealedBuffer::Samples { samples, .. } => samples.len(),
            SealedBuffer::Frames { timestamps, .. } => timestamps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timestamps(&self) -> Vec<Duration> {
        match self {
            SealedBuffer::Samples { samples, .. } => samples.iter().map(|s| s.timestamp).collect(),
            SealedBuffer::Frames { timestamps, .. } => timestamps.clone(),
        }
    }
}

/// Buffer handle shared between a sampler and the supervisor
pub type SharedBuffer = Arc<Mutex<SourceBuffer>>;

impl SourceBuffer {
    /// Create a buffer for a source. `frame_dir` is only used by cameras.
    pub fn new(name: &str, kind: SourceKind, frame_dir: PathBuf) -> Self {
        let storage = if kind.is_image() {
            Storage::Frames(FrameStore::new(frame_dir))
        } else {
            Storage::Samples(SampleBuffer::new(Arc::from(name)))
        };
        Self {
            kind,
            storage,
            last_timestamp: None,
            sealed: false,
        }
    }

    pub fn shared(self) -> SharedBuffer {
        Arc::new(Mutex::new(self))
    }

    /// Append a sample. Rejected samples leave the buffer unchanged.
    pub fn push(&mut self, timestamp: Duration, payload: Payload) -> Result<(), BufferError> {
        if self.sealed {
            return Err(BufferError::Sealed);
        }
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                return Err(BufferError::NonIncreasingTimestamp {
                    previous,
                    current: timestamp,
                });
            }
        }

        match (&mut self.storage, payload) {
            (Storage::Frames(store), Payload::Image(frame)) => store.push(timestamp, &frame)?,
            (Storage::Frames(_), other) => {
                return Err(BufferError::KindMismatch {
                    kind: self.kind,
                    payload: other.type_name(),
                })
            }
            (Storage::Samples(_), Payload::Image(_)) => {
                return Err(BufferError::KindMismatch {
                    kind: self.kind,
                    payload: "image",
                })
            }
            (Storage::Samples(buffer), other) => buffer.push(timestamp, other)?,
        }

        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Samples(b) => b.samples.len(),
            Storage::Frames(f) => f.timestamps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Close the buffer to further writes and take its contents.
    ///
    /// Staged frame files stay on disk; only their index moves out.
    pub fn seal(&mut self) -> SealedBuffer {
        self.sealed = true;
        match &mut self.storage {
            Storage::Samples(buffer) => SealedBuffer::Samples {
                samples: std::mem::take(&mut buffer.samples),
                shape: buffer.shape,
            },
            Storage::Frames(store) => SealedBuffer::Frames {
                dir: store.dir.clone(),
                timestamps: std::mem::take(&mut store.timestamps),
            },
        }
    }
}
