//! Telemetry sources
//!
//! The capability every driver implements, the payload types it produces,
//! and synthetic sources for demos and tests.

pub mod mock;
pub mod traits;

// Re-export traits
pub use traits::{ImageFrame, Payload, PixelFormat, Source, SourceError, SourceKind};
