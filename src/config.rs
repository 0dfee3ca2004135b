use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::acquisition::RetryPolicy;
use crate::error::{Error, Result};

/// Locations of the pre-built lookup tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePaths {
    pub country_weights: PathBuf,
    pub city_index: PathBuf,
    pub coordinate_index: PathBuf,
}

impl Default for TablePaths {
    fn default() -> Self {
        Self {
            country_weights: PathBuf::from("data/country_weights.csv"),
            city_index: PathBuf::from("data/city_index.json"),
            coordinate_index: PathBuf::from("data/coordinate_index.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
    /// Number of directional views per location (1-4)
    pub views: u8,
    /// Draw the base heading uniformly from [0, 360) instead of using 0
    pub random_heading: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 600,
            views: 4,
            random_heading: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u64>,
    pub max_elapsed_secs: Option<u64>,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            max_elapsed: self.max_elapsed_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Minimum delay between two requests to the imagery provider
    pub min_request_interval_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            min_request_interval_ms: 0,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

/// How collected records are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One ZIP archive at `output`
    #[default]
    Archive,
    /// One PNG per view inside the `output` directory
    Png,
    /// One JPEG per view inside the `output` directory
    #[serde(alias = "jpeg")]
    Jpg,
}

impl OutputFormat {
    /// Image encoding of the per-view files, `None` for the archive.
    pub fn image_format(self) -> Option<image::ImageFormat> {
        match self {
            OutputFormat::Archive => None,
            OutputFormat::Png => Some(image::ImageFormat::Png),
            OutputFormat::Jpg => Some(image::ImageFormat::Jpeg),
        }
    }
}

/// Everything a dataset run needs, passed explicitly to each component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub tables: TablePaths,
    pub image: ImageConfig,
    pub dataset_size: usize,
    pub search_radius_m: u32,
    pub output: PathBuf,
    pub output_format: OutputFormat,
    pub seed: Option<u64>,
    pub retry: RetryConfig,
    pub http: HttpConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tables: TablePaths::default(),
            image: ImageConfig::default(),
            dataset_size: 100,
            search_radius_m: 10_000,
            output: PathBuf::from("dataset.zip"),
            output_format: OutputFormat::Archive,
            seed: None,
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl RunConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=4).contains(&self.image.views) {
            return Err(Error::invalid_config(format!(
                "image.views must be between 1 and 4, got {}",
                self.image.views
            )));
        }
        if self.image.width == 0 || self.image.height == 0 {
            return Err(Error::invalid_config(format!(
                "image size must be non-zero, got {}x{}",
                self.image.width, self.image.height
            )));
        }
        if self.search_radius_m == 0 {
            return Err(Error::invalid_config("search_radius_m must be positive"));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(Error::invalid_config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}
