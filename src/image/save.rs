//! Image saving utilities.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use crate::error::{Error, Result};

use super::RasterBuffer;

/// Resolve the output container format from an explicit name or the path extension.
///
/// Falls back to PNG when neither is present.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] for unknown format names.
pub fn output_format(path: &Path, explicit: Option<&str>) -> Result<ImageFormat> {
    let name = explicit
        .map(str::to_string)
        .or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
        })
        .unwrap_or_else(|| "png".to_string());

    ImageFormat::from_extension(&name)
        .ok_or_else(|| Error::UnsupportedFormat(format!("image format '{name}'")))
}

/// Encode a raster into an image container.
///
/// `quality` (1-100) only affects JPEG. JPEG output drops any alpha channel.
///
/// # Errors
///
/// Returns an error if the raster has more than four channels or encoding fails.
pub fn encode_raster(raster: &RasterBuffer, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let img = raster.to_dynamic()?;
    let mut out = Cursor::new(Vec::new());

    if format == ImageFormat::Jpeg {
        let img = match img.color().channel_count() {
            1 | 3 => img,
            2 => DynamicImage::ImageLuma8(img.to_luma8()),
            _ => DynamicImage::ImageRgb8(img.to_rgb8()),
        };
        let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        img.write_with_encoder(encoder).map_err(Error::ImageEncode)?;
    } else {
        img.write_to(&mut out, format).map_err(Error::ImageEncode)?;
    }

    Ok(out.into_inner())
}

/// Encode a raster and write it to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns an error if encoding fails or the file cannot be written.
pub fn save_raster<P: AsRef<Path>>(
    raster: &RasterBuffer,
    path: P,
    format: ImageFormat,
    quality: u8,
) -> Result<()> {
    let path = path.as_ref();

    let bytes = encode_raster(raster, format, quality).map_err(|err| match err {
        Error::ImageEncode(source) => Error::ImageSave {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;

    Ok(())
}
