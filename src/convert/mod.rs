//! Dataset conversion module
//!
//! Read-only transform of a saved session into a training dataset.

pub mod dataset;

pub use dataset::{convert_session, ConversionError, ConversionSummary, ConvertOptions};
