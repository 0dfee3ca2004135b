//! Plain image-file output: every view of a record is written next to the
//! others as `{lat}_{lon}_{view}.{ext}` inside one directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{ImageFormat, RgbImage};
use tracing::debug;

use crate::archive::RecordSink;
use crate::error::{Error, Result};
use crate::record::{DatasetRecord, ImageTensor};

/// Writes each view of a record as a separate PNG or JPEG file.
#[derive(Debug, Clone)]
pub struct ImageDirWriter {
    dir: PathBuf,
    format: ImageFormat,
}

impl ImageDirWriter {
    /// Only PNG and JPEG output is supported.
    pub fn new(dir: impl Into<PathBuf>, format: ImageFormat) -> Result<Self> {
        if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
            return Err(Error::invalid_config(format!(
                "unsupported image output format {format:?}; expected png or jpg"
            )));
        }
        Ok(Self {
            dir: dir.into(),
            format,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "jpg",
            _ => "png",
        }
    }

    /// File the view with index `view` of `record` is written to.
    pub fn view_path(&self, record: &DatasetRecord, view: usize) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{view}.{}",
            record.imagery.y(),
            record.imagery.x(),
            self.extension()
        ))
    }
}

fn to_rgb_image(tensor: &ImageTensor) -> Option<RgbImage> {
    let (height, width, _) = tensor.dim();
    RgbImage::from_raw(width as u32, height as u32, tensor.iter().copied().collect())
}

impl RecordSink for ImageDirWriter {
    fn append(&mut self, record: &DatasetRecord) -> Result<String> {
        let name = format!("{}_{}", record.imagery.y(), record.imagery.x());
        let images = record
            .images
            .iter()
            .map(|tensor| {
                to_rgb_image(tensor)
                    .ok_or_else(|| Error::archive(&name, format!("bad image shape {:?}", tensor.dim())))
            })
            .collect::<Result<Vec<_>>>()?;

        fs::create_dir_all(&self.dir)?;
        for (view, image) in images.iter().enumerate() {
            let path = self.view_path(record, view);
            image.save_with_format(&path, self.format)?;
            debug!(path = %path.display(), "Saved view.");
        }
        Ok(name)
    }
}
