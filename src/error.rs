//! Error types for dataset acquisition.
//!
//! `AttemptError` covers the routine failures that only abort the current
//! acquisition attempt (ocean coordinates, imagery deserts, ...). Everything
//! else is an `Error` and terminates the run.

use std::path::Path;

use thiserror::Error;

/// Result type alias for acquisition operations
pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable failures of a single acquisition attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    #[error("country '{0}' not found in the city index")]
    UnknownCountry(String),

    #[error("no cities listed for country '{0}'")]
    EmptyCityList(String),

    #[error("city '{0}' not found in the coordinate index")]
    UnknownCity(String),

    #[error("no places found within {radius_m} m of ({lat}, {lon})")]
    NoPlacesFound { lat: f64, lon: f64, radius_m: u32 },

    #[error("no street-level imagery at ({lat}, {lon}): status {status}")]
    NoImageryAvailable { lat: f64, lon: f64, status: String },

    #[error("view count must be between 1 and 4, got {0}")]
    InvalidViewCount(u8),

    #[error("only {fetched} of {expected} views could be fetched")]
    IncompleteViews { expected: usize, fetched: usize },

    #[error("unusable response from {endpoint}: {reason}")]
    BadResponse { endpoint: String, reason: String },

    #[error("{endpoint} temporarily unavailable: status {status}")]
    ServiceUnavailable { endpoint: String, status: String },
}

/// Fatal errors
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Attempt(#[from] AttemptError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("imagery service returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("{endpoint} rejected the request ({status}): {message}")]
    Rejected {
        endpoint: String,
        status: String,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed table {path}: {reason}")]
    Table { path: String, reason: String },

    #[error("malformed archive entry '{entry}': {reason}")]
    Archive { entry: String, reason: String },

    #[error("gave up after {attempts} attempts; last error: {last}")]
    RetriesExhausted { attempts: u64, last: String },
}

impl Error {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn table<P: AsRef<Path>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::Table {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn archive<S: Into<String>, R: Into<String>>(entry: S, reason: R) -> Self {
        Self::Archive {
            entry: entry.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should restart the acquisition attempt instead of
    /// ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Attempt(_))
    }
}
