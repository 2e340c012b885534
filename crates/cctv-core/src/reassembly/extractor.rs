use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tracing::{debug, info};
use uuid::Uuid;

use super::markers::{candidate_ranges, SOI_VARIANTS};
use super::{ReassemblyError, SalvageStrategy, SalvagedImage};

/// Slices and chunks must be longer than this to be considered an image.
pub const DEFAULT_MIN_IMAGE_LEN: usize = 500;

/// Chunk splitting is only attempted on blobs larger than this.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 2000;

/// Formats tried by the whole-blob probe, in order.
const PROBE_FORMATS: [ImageFormat; 5] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Bmp,
    ImageFormat::Gif,
    ImageFormat::Tiff,
];

/// Chunk sizes are the blob length divided by each of these.
const CHUNK_DIVISORS: [usize; 4] = [1, 2, 3, 4];

/// Recovers images from an undelimited blob and writes them to `output_dir`.
#[derive(Debug, Clone)]
pub struct ImageReassembler {
    output_dir: PathBuf,
    min_image_len: usize,
    chunk_threshold: usize,
}

impl ImageReassembler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            min_image_len: DEFAULT_MIN_IMAGE_LEN,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
        }
    }

    pub fn with_min_image_len(mut self, min_image_len: usize) -> Self {
        self.min_image_len = min_image_len;
        self
    }

    pub fn with_chunk_threshold(mut self, chunk_threshold: usize) -> Self {
        self.chunk_threshold = chunk_threshold;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Extracts every image it can find in `blob`.
    ///
    /// Stages run in order and the first stage that yields anything wins:
    /// marker scan, whole-blob format probe, then chunk splitting.  An empty
    /// result means nothing in the blob decoded.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::Io`] if a recovered image cannot be written.
    pub fn extract(&self, blob: &[u8]) -> Result<Vec<SalvagedImage>, ReassemblyError> {
        if blob.is_empty() {
            return Ok(Vec::new());
        }

        let images = self.extract_by_markers(blob)?;
        if !images.is_empty() {
            info!("recovered {} image(s) by marker scan from {} bytes", images.len(), blob.len());
            return Ok(images);
        }

        if let Some(image) = self.probe_formats(blob)? {
            info!("recovered whole {}-byte blob as {:?}", blob.len(), image.format);
            return Ok(vec![image]);
        }

        let images = self.split_chunks(blob)?;
        if images.is_empty() {
            debug!("no image found in {}-byte blob", blob.len());
        } else {
            info!("recovered {} image(s) by chunk splitting", images.len());
        }
        Ok(images)
    }

    fn extract_by_markers(&self, blob: &[u8]) -> Result<Vec<SalvagedImage>, ReassemblyError> {
        for soi in SOI_VARIANTS {
            let mut images = Vec::new();
            for range in candidate_ranges(blob, soi, self.min_image_len) {
                let slice = &blob[range.clone()];
                match image::load_from_memory_with_format(slice, ImageFormat::Jpeg) {
                    Ok(decoded) => images.push(self.save(
                        slice,
                        &decoded,
                        ImageFormat::Jpeg,
                        SalvageStrategy::MarkerScan,
                        "extracted",
                    )?),
                    Err(e) => debug!("discarding slice {range:?}: {e}"),
                }
            }
            if !images.is_empty() {
                return Ok(images);
            }
        }
        Ok(Vec::new())
    }

    fn probe_formats(&self, blob: &[u8]) -> Result<Option<SalvagedImage>, ReassemblyError> {
        for format in PROBE_FORMATS {
            if let Ok(decoded) = image::load_from_memory_with_format(blob, format) {
                let saved = self.save(blob, &decoded, format, SalvageStrategy::FormatProbe, "probed")?;
                return Ok(Some(saved));
            }
        }
        Ok(None)
    }

    fn split_chunks(&self, blob: &[u8]) -> Result<Vec<SalvagedImage>, ReassemblyError> {
        if blob.len() <= self.chunk_threshold {
            return Ok(Vec::new());
        }

        for divisor in CHUNK_DIVISORS {
            let chunk_size = blob.len() / divisor;
            if chunk_size < self.min_image_len {
                continue;
            }

            let mut images = Vec::new();
            for chunk in blob.chunks(chunk_size) {
                if chunk.len() < self.min_image_len {
                    continue;
                }
                let Ok(format) = image::guess_format(chunk) else {
                    continue;
                };
                if let Ok(decoded) = image::load_from_memory_with_format(chunk, format) {
                    images.push(self.save(chunk, &decoded, format, SalvageStrategy::ChunkSplit, "chunk")?);
                }
            }
            if !images.is_empty() {
                return Ok(images);
            }
        }
        Ok(Vec::new())
    }

    fn save(
        &self,
        bytes: &[u8],
        decoded: &DynamicImage,
        format: ImageFormat,
        strategy: SalvageStrategy,
        prefix: &str,
    ) -> Result<SalvagedImage, ReassemblyError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ReassemblyError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let extension = format.extensions_str().first().copied().unwrap_or("bin");
        let path = self
            .output_dir
            .join(format!("{prefix}_{}.{extension}", Uuid::new_v4().simple()));
        std::fs::write(&path, bytes).map_err(|source| ReassemblyError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(SalvagedImage {
            path,
            format,
            byte_len: bytes.len(),
            width: decoded.width(),
            height: decoded.height(),
            strategy,
        })
    }
}
