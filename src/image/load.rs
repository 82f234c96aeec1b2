//! Image loading utilities.

use std::path::Path;

use crate::error::{Error, Result};

use super::RasterBuffer;

/// Load an image from disk into an 8-bit raster buffer.
///
/// The channel count follows the source image (gray, gray+alpha, RGB or RGBA).
///
/// # Errors
///
/// Returns an error if the file is missing or cannot be decoded.
pub fn load_raster<P: AsRef<Path>>(path: P) -> Result<RasterBuffer> {
    let path = path.as_ref();

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    let raster = RasterBuffer::from_dynamic(img);
    tracing::debug!(
        "Decoded {} ({}x{}x{})",
        path.display(),
        raster.width,
        raster.height,
        raster.channels
    );

    Ok(raster)
}

/// Decode an in-memory image container.
///
/// # Errors
///
/// Returns an error if the bytes are not a supported image format.
pub fn decode_raster(bytes: &[u8]) -> Result<RasterBuffer> {
    let img = image::load_from_memory(bytes).map_err(|source| Error::ImageLoad {
        path: "<memory>".into(),
        source,
    })?;
    Ok(RasterBuffer::from_dynamic(img))
}
