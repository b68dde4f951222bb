//! Video export module
//!
//! This module turns the frames staged by camera sources into one video file
//! per source using FFmpeg.

pub mod ffmpeg;
pub mod pipeline;
pub mod types;

pub use ffmpeg::{build_encode_args, encode_frames, is_ffmpeg_available};
pub use pipeline::{EncodeJob, EncodeOutcome, VideoPipeline};
pub use types::{EncodedStream, EncodingError, VideoCodec, VideoConfig};
