//! Point-in-time CSV backups
//!
//! Written after every load attempt so a copy of the processed records exists
//! even when the database write failed.

use chrono::{DateTime, TimeZone};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Timestamp part of a snapshot file name
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// Upper bound on `_N` suffixes tried for one minute
const MAX_SUFFIX: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error writing snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error writing snapshot {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("No free snapshot file name for {0}")]
    NameExhausted(String),
}

/// Writes record sets to `<dir>/<dataset>_<YYYYMMDD_HHMM>.csv`
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize `records` with a header row and return the file path.
    ///
    /// A file already present for the same minute is never overwritten; the
    /// new one gets a `_2`, `_3`, ... suffix. An empty record set produces an
    /// empty file.
    pub fn write<R, Tz>(
        &self,
        dataset: &str,
        records: &[R],
        timestamp: DateTime<Tz>,
    ) -> Result<PathBuf, SnapshotError>
    where
        R: Serialize,
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        std::fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let stem = format!("{dataset}_{}", timestamp.format(FILENAME_TIMESTAMP_FORMAT));
        let (path, file) = self.create_unique(&stem)?;

        let mut writer = csv::Writer::from_writer(file);
        for record in records {
            writer.serialize(record).map_err(|source| SnapshotError::Csv {
                path: path.clone(),
                source,
            })?;
        }
        writer.flush().map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), records = records.len(), "Snapshot saved");
        Ok(path)
    }

    fn create_unique(&self, stem: &str) -> Result<(PathBuf, File), SnapshotError> {
        for n in 1..=MAX_SUFFIX {
            let name = if n == 1 {
                format!("{stem}.csv")
            } else {
                format!("{stem}_{n}.csv")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(SnapshotError::Io { path, source }),
            }
        }
        Err(SnapshotError::NameExhausted(stem.to_string()))
    }
}
