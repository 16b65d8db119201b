//! Filesystem access to job request records.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::JobRequest;

const REQUESTS_DIR: &str = "requests";
const RECORD_FILE: &str = "request.json";
const TEMP_FILE: &str = "request.json.tmp";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid request record {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-modify-write access to `<root>/requests/<id>/request.json`.
#[derive(Debug, Clone)]
pub struct RequestStore {
    root: PathBuf,
}

impl RequestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by a single request.
    pub fn request_dir(&self, request_id: &str) -> PathBuf {
        self.root.join(REQUESTS_DIR).join(request_id)
    }

    /// Path of the record file for a request.
    pub fn record_path(&self, request_id: &str) -> PathBuf {
        self.request_dir(request_id).join(RECORD_FILE)
    }

    /// Load an existing record.
    ///
    /// A missing request directory is reported separately from I/O failures
    /// so callers can tell "not materialized yet" from a broken store.
    pub fn load(&self, request_id: &str) -> Result<JobRequest, StoreError> {
        let dir = self.request_dir(request_id);
        if !dir.is_dir() {
            return Err(StoreError::MissingDirectory(dir));
        }

        let path = dir.join(RECORD_FILE);
        let raw = fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        serde_json::from_slice(&raw).map_err(|source| StoreError::Parse { path, source })
    }

    /// Overwrite the record in full.
    ///
    /// The document is written to a sibling temp file and renamed over the
    /// record, so concurrent readers see either the old or the new content.
    pub fn save(&self, request_id: &str, request: &JobRequest) -> Result<(), StoreError> {
        let dir = self.request_dir(request_id);
        if !dir.is_dir() {
            return Err(StoreError::MissingDirectory(dir));
        }

        let tmp_path = dir.join(TEMP_FILE);
        let path = dir.join(RECORD_FILE);

        if let Err(e) = write_json(&tmp_path, request) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io { path, source }
        })
    }
}

fn write_json(path: &Path, request: &JobRequest) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, request).map_err(|e| io_err(e.into()))?;
    writer.flush().map_err(io_err)?;
    writer.get_ref().sync_all().map_err(io_err)?;

    Ok(())
}
