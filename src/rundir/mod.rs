//! Run directory layout
//!
//! ```text
//! <run>/meta.json        RunMeta (problem + configuration fingerprint)
//! <run>/bootstrap.json   BootstrapWeights used by the run
//! <run>/samples.jsonl    append-only SampleRecord log (single source of truth)
//! <run>/harvest/         harvest output (ensemble.json, meta.json)
//! ```
//!
//! Everything except the sample log is either an input fingerprint or a
//! reproducible projection of the log.

mod log;
mod meta;

pub use log::{read_records, SampleLog};
pub use meta::{RunMeta, FORMAT_VERSION};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bootstrap::BootstrapWeights;
use crate::sample::SampleRecord;
use crate::{Error, Result};

const META_FILE: &str = "meta.json";
const BOOTSTRAP_FILE: &str = "bootstrap.json";
const LOG_FILE: &str = "samples.jsonl";
const HARVEST_DIR: &str = "harvest";

/// Paths and typed access to one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// Refer to a run directory (it need not exist yet).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `meta.json`.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }

    /// Path of `bootstrap.json`.
    #[must_use]
    pub fn bootstrap_path(&self) -> PathBuf {
        self.path.join(BOOTSTRAP_FILE)
    }

    /// Path of the sample log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Path of the harvest output directory.
    #[must_use]
    pub fn harvest_dir(&self) -> PathBuf {
        self.path.join(HARVEST_DIR)
    }

    /// Whether the directory exists and has any content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be listed.
    pub fn has_content(&self) -> Result<bool> {
        has_content(&self.path)
    }

    /// Read `meta.json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoData`] if it does not exist.
    pub fn read_meta(&self) -> Result<RunMeta> {
        read_json(&self.meta_path())
    }

    /// Write `meta.json` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] / [`Error::Json`] on failure.
    pub fn write_meta(&self, meta: &RunMeta) -> Result<()> {
        write_json_atomic(&self.meta_path(), meta)
    }

    /// Read `bootstrap.json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoData`] if it does not exist.
    pub fn read_bootstrap(&self) -> Result<BootstrapWeights> {
        read_json(&self.bootstrap_path())
    }

    /// Write `bootstrap.json` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] / [`Error::Json`] on failure.
    pub fn write_bootstrap(&self, weights: &BootstrapWeights) -> Result<()> {
        write_json_atomic(&self.bootstrap_path(), weights)
    }

    /// Snapshot of every complete record in the sample log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoData`] if the log does not exist or is empty.
    pub fn read_records(&self) -> Result<Vec<SampleRecord>> {
        let path = self.log_path();
        if !path.exists() {
            return Err(Error::NoData(format!(
                "no sample log in {}",
                self.path.display()
            )));
        }
        let records = read_records(&path)?;
        if records.is_empty() {
            return Err(Error::NoData(format!(
                "sample log in {} is empty",
                self.path.display()
            )));
        }
        Ok(records)
    }

    /// Remove everything in the run directory, keeping the directory itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on failure.
    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn has_content(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    Ok(fs::read_dir(path)?.next().is_some())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NoData(format!("{} does not exist", path.display())));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::StorageError(format!("{}: {e}", path.display())))
}

/// Write pretty JSON to a sibling temp file, sync it, then rename over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');

    let mut file = fs::File::create(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}
