//! Collection engine
//!
//! This module implements the multi-rate sampling architecture:
//! - Per-source buffers (in-memory samples, on-disk staged frames)
//! - One sampler thread per source, ticked at its own frequency
//! - Session to orchestrate start, stop, flush and encoding

pub mod buffer;
pub mod channel;
pub mod coordinator;
pub mod state;

pub use buffer::{BufferError, Sample, SealedBuffer, SourceBuffer};
pub use channel::{RegistrationError, SessionError, SessionResult, StopSignal};
pub use coordinator::{Session, SessionEvent, StopHandle};
pub use state::{
    codes, CollectorConfig, ReportedError, SessionReport, SessionState, SourceConfig, SourceReport,
};
