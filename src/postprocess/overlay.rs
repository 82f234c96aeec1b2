//! Final resize and blend-over-original stages.

use image::{imageops, DynamicImage};
use serde::Deserialize;

use crate::error::Result;
use crate::image::{resize_raster, RasterBuffer, ResizeOptions};
use crate::tensor::to_byte;

/// Keyword form of `resizeTo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeKeyword {
    /// Back to the size of the decoded input.
    Input,
}

/// `postprocessing.resizeTo`: `"input"` or an explicit box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ResizeTo {
    Keyword(ResizeKeyword),
    Size(ResizeOptions),
}

/// Resize the processed raster to its final size.
///
/// # Errors
///
/// Propagates resize failures.
pub fn resize_to(
    raster: &RasterBuffer,
    target: &ResizeTo,
    input_size: (u32, u32),
) -> Result<RasterBuffer> {
    let opts = match target {
        ResizeTo::Keyword(ResizeKeyword::Input) => ResizeOptions::exact(input_size.0, input_size.1),
        ResizeTo::Size(opts) => *opts,
    };
    tracing::debug!("Resize output to {}x{} ({:?})", opts.width, opts.height, opts.fit);
    resize_raster(raster, &opts)
}

/// `postprocessing.blendOverlay`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BlendOverlayConfig {
    /// Opacity of the processed layer, clamped to `[0, 1]`.
    pub alpha: f32,
}

impl Default for BlendOverlayConfig {
    fn default() -> Self {
        Self { alpha: 0.5 }
    }
}

/// Composite `processed` over `original` with the given layer opacity.
///
/// The original is resized to the processed size first. The result is RGBA.
///
/// # Errors
///
/// Returns an error if either raster cannot be represented as an image.
pub fn blend_overlay(
    processed: &RasterBuffer,
    original: &RasterBuffer,
    alpha: f32,
) -> Result<RasterBuffer> {
    let alpha = alpha.clamp(0.0, 1.0);
    let base = resize_raster(
        original,
        &ResizeOptions::exact(processed.width, processed.height),
    )?;

    let mut base = base.to_dynamic()?.to_rgba8();
    let mut layer = processed.to_dynamic()?.to_rgba8();
    for px in layer.pixels_mut() {
        px.0[3] = to_byte(f32::from(px.0[3]) * alpha);
    }

    tracing::debug!("Blend overlay at alpha {alpha}");
    imageops::overlay(&mut base, &layer, 0, 0);
    Ok(RasterBuffer::from_dynamic(DynamicImage::ImageRgba8(base)))
}
