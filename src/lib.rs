//! # streetsampler
//! This crate builds labeled street-level imagery datasets for training and evaluating geolocation models.
//!
//! ## Usage
//! The main feature of this library is the `AcquisitionLoop`, which repeatedly samples a country weighted by land area,
//! picks one of its cities, finds nearby street-level imagery through an `ImageryProvider` and stores the captured views
//! together with their location in an archive (or, alternatively, as plain image files).
//!
//! The `datasets` module loads (and, offline, builds) the lookup tables the loop samples from.
//! See the `streetsampler` binary for a full run: building the tables, collecting a dataset and inspecting the archive.

pub mod acquisition;
pub mod archive;
pub mod config;
pub mod datasets;
pub mod error;
pub mod fetcher;
pub mod image_dir;
pub mod locator;
pub mod logging;
pub mod provider;
pub mod record;
pub mod sampling;

#[cfg(test)]
pub(crate) mod test_utils;

pub use acquisition::{AcquisitionLoop, ImageSize, RetryPolicy, RunSummary};
pub use archive::{ArchiveReader, ArchiveWriter, RecordSink};
pub use config::{OutputFormat, RunConfig};
pub use error::{AttemptError, Error, Result};
pub use image_dir::ImageDirWriter;
pub use record::DatasetRecord;
