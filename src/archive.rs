//! Persistent dataset archive.
//!
//! The archive is a single ZIP file. Record `N` is stored as
//! `entry_N/attributes.json` (scalar metadata) and `entry_N/images.bin`
//! (the `views × height × width × 3` u8 tensor in row-major order).
//! Every append opens the file, writes one whole entry and closes it again.
//!
//! Each append also leaves an empty `issued/entry_N` marker. Entry names are
//! allocated past every index ever issued, so removing entries from the
//! archive never causes a name to be handed out twice. An entry missing one
//! of its two members (an interrupted write) is not listed by the reader.

use std::{
    collections::BTreeSet,
    fs::{File, OpenOptions},
    io::{Read, Seek, Write},
    path::{Path, PathBuf},
};

use ndarray::{Array4, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::record::DatasetRecord;

const ENTRY_PREFIX: &str = "entry_";
const ATTRIBUTES_FILE: &str = "attributes.json";
const IMAGES_FILE: &str = "images.bin";
const ISSUED_DIR: &str = "issued/";

/// Scalar metadata of one archive entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAttributes {
    pub country: String,
    pub city: String,
    /// Imagery point
    pub lat: f64,
    pub lon: f64,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub offset_m: f64,
    pub headings: Vec<f64>,
    /// `[views, height, width, 3]`
    pub shape: [usize; 4],
    pub dtype: String,
}

impl EntryAttributes {
    fn from_record(record: &DatasetRecord, shape: [usize; 4]) -> Self {
        Self {
            country: record.country.clone(),
            city: record.city.clone(),
            lat: record.imagery.y(),
            lon: record.imagery.x(),
            origin_lat: record.origin.y(),
            origin_lon: record.origin.x(),
            offset_m: record.offset_m(),
            headings: record.headings.clone(),
            shape,
            dtype: "uint8".to_string(),
        }
    }
}

/// Destination for completed records.
pub trait RecordSink {
    /// Stores `record` and returns the name it was stored under.
    fn append(&mut self, record: &DatasetRecord) -> Result<String>;
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn append(&mut self, record: &DatasetRecord) -> Result<String> {
        (**self).append(record)
    }
}

fn entry_index(file_name: &str) -> Option<usize> {
    let (entry, _) = file_name.split_once('/')?;
    entry.strip_prefix(ENTRY_PREFIX)?.parse().ok()
}

fn issued_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(ISSUED_DIR)?
        .strip_prefix(ENTRY_PREFIX)?
        .parse()
        .ok()
}

fn entry_indices<R: Read + Seek>(archive: &ZipArchive<R>) -> BTreeSet<usize> {
    archive.file_names().filter_map(entry_index).collect()
}

/// Indices of entries that have both their attributes and their images.
fn complete_entries<R: Read + Seek>(archive: &ZipArchive<R>) -> BTreeSet<usize> {
    let names: BTreeSet<&str> = archive.file_names().collect();
    entry_indices(archive)
        .into_iter()
        .filter(|&index| {
            let name = entry_name(index);
            names.contains(format!("{name}/{ATTRIBUTES_FILE}").as_str())
                && names.contains(format!("{name}/{IMAGES_FILE}").as_str())
        })
        .collect()
}

fn entry_name(index: usize) -> String {
    format!("{ENTRY_PREFIX}{index}")
}

/// Stacks the record's images into one `views × height × width × 3` tensor.
fn stack_images(record: &DatasetRecord) -> Result<Array4<u8>> {
    let views: Vec<_> = record.images.iter().map(|image| image.view()).collect();
    if views.is_empty() {
        return Err(Error::archive("<new>", "record has no images"));
    }
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Appends records to the archive at `path`.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    path: PathBuf,
}

impl ArchiveWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the entry the next append will create: one past the highest
    /// index ever issued or still present, or `entry_0` for a missing or
    /// empty archive.
    pub fn next_entry_name(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(entry_name(0));
        }
        let archive = ZipArchive::new(File::open(&self.path)?)?;
        let issued = archive.file_names().filter_map(issued_index).max();
        let present = entry_indices(&archive).last().copied();
        let next = issued.max(present).map_or(0, |highest| highest + 1);
        Ok(entry_name(next))
    }
}

impl RecordSink for ArchiveWriter {
    /// Encodes the whole entry before touching the file. A failure while
    /// writing is fatal; whatever was written is ignored by `ArchiveReader`.
    fn append(&mut self, record: &DatasetRecord) -> Result<String> {
        let name = self.next_entry_name()?;
        let tensor = stack_images(record)?;
        let shape = [
            tensor.len_of(Axis(0)),
            tensor.len_of(Axis(1)),
            tensor.len_of(Axis(2)),
            tensor.len_of(Axis(3)),
        ];
        let attributes = serde_json::to_vec_pretty(&EntryAttributes::from_record(record, shape))?;
        let images: Vec<u8> = tensor.iter().copied().collect();

        let mut writer = if self.path.exists() {
            let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            ZipWriter::new_append(file)?
        } else {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            ZipWriter::new(File::create(&self.path)?)
        };
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        writer.start_file(format!("{name}/{ATTRIBUTES_FILE}"), options)?;
        writer.write_all(&attributes)?;
        writer.start_file(format!("{name}/{IMAGES_FILE}"), options)?;
        writer.write_all(&images)?;
        writer.start_file(format!("{ISSUED_DIR}{name}"), options)?;

        writer.finish()?;
        debug!(entry = %name, path = %self.path.display(), "Appended archive entry.");
        Ok(name)
    }
}

/// Read access to an archive written by `ArchiveWriter`.
pub struct ArchiveReader {
    archive: ZipArchive<File>,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            archive: ZipArchive::new(File::open(path)?)?,
        })
    }

    /// Names of complete entries in index order.
    pub fn entries(&self) -> Vec<String> {
        complete_entries(&self.archive)
            .into_iter()
            .map(entry_name)
            .collect()
    }

    pub fn len(&self) -> usize {
        complete_entries(&self.archive).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_file(&mut self, entry: &str, file: &str) -> Result<Vec<u8>> {
        let mut member = self
            .archive
            .by_name(&format!("{entry}/{file}"))
            .map_err(|_| Error::archive(entry, format!("missing {file}")))?;
        let mut bytes = Vec::new();
        member.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    pub fn attributes(&mut self, entry: &str) -> Result<EntryAttributes> {
        let bytes = self.read_file(entry, ATTRIBUTES_FILE)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn images(&mut self, entry: &str) -> Result<Array4<u8>> {
        let attributes = self.attributes(entry)?;
        let bytes = self.read_file(entry, IMAGES_FILE)?;
        let [views, height, width, channels] = attributes.shape;
        Array4::from_shape_vec((views, height, width, channels), bytes)
            .map_err(|e| Error::archive(entry, e.to_string()))
    }
}
