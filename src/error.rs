// THEORY:
// One error type for the whole engine. The variants follow how each failure is
// handled at runtime rather than where it happens:
// - `DataQuality` is recovered locally: the offending winner is dropped and the
//   run continues.
// - `ResourceExhaustion` is recovered locally: the event keeps going, only its
//   descriptor is marked unavailable.
// - `Configuration` and the I/O family are fatal and propagate to the caller.
// "No match found" is never an error; it is an ordinary association outcome.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the event engine and its reporting sink.
#[derive(Error, Debug)]
pub enum EventError {
    /// A malformed or degenerate winner or region, rejected at ingestion.
    #[error("data quality issue in frame {frame}: {reason}")]
    DataQuality { frame: u32, reason: String },

    /// Out-of-range or inconsistent configuration values.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Feature extraction asked for more support than the region provides.
    #[error("feature extraction unavailable for event {event}: {reason}")]
    ResourceExhaustion { event: u64, reason: String },

    /// The reporting sink could not be read or written.
    #[error("I/O failure on {}: {source}", path.display())]
    FatalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An event clip could not be encoded.
    #[error("image failure on {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine step running on the blocking pool did not hand its state back.
    #[error("event engine unavailable: {0}")]
    EngineLost(String),

    /// A report file was readable but its contents were not.
    #[error("malformed report at line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl EventError {
    /// True for errors that must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EventError::DataQuality { .. } | EventError::ResourceExhaustion { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EventError::FatalIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EventError>;
