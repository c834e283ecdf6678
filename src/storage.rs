// SPDX-License-Identifier: MPL-2.0

//! Still image persistence
//!
//! The capture core hands encoded bytes to a [`StillImageSink`] and never
//! decides where or under what name they end up.

use crate::errors::{CoreError, CoreResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a still ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStill {
    pub location: PathBuf,
    pub bytes: usize,
}

/// Receiver of encoded still images
pub trait StillImageSink: Send {
    /// Persist one still
    ///
    /// Implementations open one output stream per call and must close it on
    /// both the success and the failure path.
    fn store(&mut self, encoded: &[u8]) -> CoreResult<StoredStill>;
}

/// Writes stills as timestamped JPEG files into a directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Sink for the user's pictures folder
    pub fn default_location() -> Self {
        Self::new(default_photo_dir())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Create the next free file for a still
    fn create_file(&self) -> io::Result<(PathBuf, File)> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut attempt = 0u32;
        loop {
            let filename = if attempt == 0 {
                format!("JPEG_{}.jpg", timestamp)
            } else {
                format!("JPEG_{}_{}.jpg", timestamp, attempt)
            };
            let path = self.directory.join(filename);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

impl StillImageSink for DirectorySink {
    fn store(&mut self, encoded: &[u8]) -> CoreResult<StoredStill> {
        fs::create_dir_all(&self.directory).map_err(|e| {
            CoreError::Storage(format!(
                "Failed to create {}: {}",
                self.directory.display(),
                e
            ))
        })?;

        let (path, file) = self.create_file()?;
        debug!(path = %path.display(), "Writing still image");

        // The file handle is dropped (closed) when this returns, on every path
        write_then_close(file, encoded)
            .map_err(|e| CoreError::Storage(format!("Failed to save photo: {}", e)))?;

        info!(path = %path.display(), bytes = encoded.len(), "Photo saved");
        Ok(StoredStill {
            location: path,
            bytes: encoded.len(),
        })
    }
}

fn write_then_close(mut file: File, encoded: &[u8]) -> io::Result<()> {
    file.write_all(encoded)?;
    file.sync_all()
}

/// Default output directory: `~/Pictures/aicamera`, or the working directory
/// when no pictures folder is known
pub fn default_photo_dir() -> PathBuf {
    dirs::picture_dir()
        .map(|dir| dir.join("aicamera"))
        .unwrap_or_else(|| PathBuf::from("."))
}
