//! Robo Recorder - multi-rate telemetry collection for robots.
//!
//! This is the library crate. It samples heterogeneous sources in parallel,
//! persists them as a session directory, encodes camera streams to video and
//! converts saved sessions into training datasets.

pub mod capture;
pub mod convert;
pub mod export;
pub mod recorder;
pub mod store;
pub mod utils;

pub use capture::{ImageFrame, Payload, PixelFormat, Source, SourceError, SourceKind};
pub use convert::{convert_session, ConversionError, ConvertOptions};
pub use recorder::{CollectorConfig, Session, SessionReport, SessionState, StopHandle};
pub use utils::error::{AppError, AppResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "robo_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
