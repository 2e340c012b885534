//! ImageStore: writes images from image-range responses to disk.

use std::path::{Path, PathBuf};

use cctv_core::dispatch::ReceivedImage;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("I/O error writing image at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Saves received images as `CCTVImage<timestamp>.jpg` under one directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes every image and returns the paths in input order.
    ///
    /// An image with the same timestamp as an earlier one overwrites it.
    pub fn save_all(&self, images: &[ReceivedImage]) -> Result<Vec<PathBuf>, ImageStoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ImageStoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut paths = Vec::with_capacity(images.len());
        for image in images {
            let path = self.dir.join(file_name(&image.timestamp));
            std::fs::write(&path, &image.bytes).map_err(|source| ImageStoreError::Io {
                path: path.clone(),
                source,
            })?;
            debug!("saved {} bytes to {}", image.bytes.len(), path.display());
            paths.push(path);
        }
        info!("saved {} image(s) to {}", paths.len(), self.dir.display());
        Ok(paths)
    }
}

/// `2024-05-01T13:45:10` becomes `CCTVImage2024_05_01T13_45_10.jpg`.
pub fn file_name(timestamp: &str) -> String {
    let stem: String = timestamp
        .chars()
        .map(|c| match c {
            ':' | '-' => '_',
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => c,
            _ => '_',
        })
        .collect();
    format!("CCTVImage{stem}.jpg")
}
