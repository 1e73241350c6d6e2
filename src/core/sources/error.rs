use thiserror::Error;

use super::memory::MemoryError;

/// Error type for metric sampling.
///
/// A `SourceError` never stops the metrics loop: the scheduler logs it where it
/// is caught and moves on to the next item, source, or cycle.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Failed to read a file from the proc filesystem.
    #[error("Failed to read file {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Encountered a parsing error while extracting a metric.
    #[error("Failed to parse {metric} from {location}: {reason}")]
    ParseError {
        metric: String,
        location: String,
        reason: String,
    },

    /// A required field was not present in the sampled data.
    #[error("Missing required field: {field} in {location}")]
    MissingField { field: String, location: String },

    /// Data was found but did not conform to the expected format.
    #[error("Invalid format in {location}: {reason}")]
    InvalidFormat { location: String, reason: String },

    /// Reading a robot memory key failed.
    #[error("Failed to read robot memory key {key}")]
    Memory {
        key: String,
        #[source]
        source: MemoryError,
    },

    /// The source cannot run here (missing subsystem, unsupported platform).
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The sampling task panicked. Reported separately from ordinary failures.
    #[error("Sampling task of '{source_name}' panicked: {reason}")]
    Panicked { source_name: String, reason: String },
}

/// Result alias used throughout the metric sources.
pub type SourceResult<T> = std::result::Result<T, SourceError>;
