//! Unified error types for the countycast pipeline
//!
//! Every failure the pipeline can detect maps onto one [`PipelineError`]
//! variant. None of them are retried internally: the pipeline fails fast and
//! leaves retrying (re-fetching a missing file, rebuilding a window) to the
//! orchestrator that called it.
//!
//! # Example
//!
//! ```ignore
//! use countycast_core::{PipelineError, PipelineResult};
//!
//! fn load_window(start: NaiveDate, end: NaiveDate) -> PipelineResult<()> {
//!     let tensor = cache.load(&location)?;
//!     dataset.apply(tensor)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all countycast operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required external source (file, table, column) is absent
    #[error("missing data: {0}")]
    MissingData(String),

    /// Overlapping or ambiguous keys across sources
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Rows of one pattern file disagree on their date range
    #[error("inconsistent window: {0}")]
    InconsistentWindow(String),

    /// Per-day visit vectors (or tensor dimensions) do not line up
    #[error("shape error: {0}")]
    Shape(String),

    /// An index or date falls outside the data that is available
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A county cannot be resolved against census or POI data
    #[error("missing county data: {0}")]
    MissingCountyData(String),

    /// A cached tensor failed schema, shape or checksum validation on load
    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    /// I/O errors (file access, rename, directory listing)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("parse error: {0}")]
    Parse(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Short machine-friendly name of the error kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MissingData(_) => "missing_data",
            PipelineError::DataIntegrity(_) => "data_integrity",
            PipelineError::InconsistentWindow(_) => "inconsistent_window",
            PipelineError::Shape(_) => "shape",
            PipelineError::OutOfRange(_) => "out_of_range",
            PipelineError::MissingCountyData(_) => "missing_county_data",
            PipelineError::CacheCorruption(_) => "cache_corruption",
            PipelineError::Io(_) => "io",
            PipelineError::Parse(_) => "parse",
            PipelineError::Config(_) => "config",
            PipelineError::Other(_) => "other",
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(format!("{err:#}"))
    }
}

impl From<String> for PipelineError {
    fn from(s: String) -> Self {
        PipelineError::Other(s)
    }
}

impl From<&str> for PipelineError {
    fn from(s: &str) -> Self {
        PipelineError::Other(s.to_string())
    }
}

// JSON parsing errors
impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Parse(err.to_string())
    }
}
