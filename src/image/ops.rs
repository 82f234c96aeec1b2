//! Geometric operations delegated to the `image` crate.

use image::imageops::FilterType;
use serde::Deserialize;

use crate::error::{Error, Result};

use super::RasterBuffer;

/// How the source is fitted into the requested box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Stretch to the exact size, ignoring aspect ratio.
    #[default]
    Fill,
    /// Scale to cover the box, then crop the overflow.
    Cover,
    /// Scale to fit inside the box, then pad to the exact size.
    Contain,
    /// Scale to fit inside the box; output may be smaller.
    Inside,
    /// Scale to cover the box; output may be larger.
    Outside,
}

/// Anchor for cover crops and contain padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Center,
    Top,
    Bottom,
    Left,
    Right,
}

impl Position {
    /// Offset of a span of `inner` pixels along an axis of `outer` pixels.
    fn offset(self, outer: u32, inner: u32, horizontal: bool) -> u32 {
        let slack = outer.abs_diff(inner);
        match (self, horizontal) {
            (Self::Left, true) | (Self::Top, false) => 0,
            (Self::Right, true) | (Self::Bottom, false) => slack,
            _ => slack / 2,
        }
    }
}

/// Target box for a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResizeOptions {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub fit: Fit,
    #[serde(default)]
    pub position: Position,
}

impl ResizeOptions {
    /// Stretch to exactly `width` x `height`.
    #[must_use]
    pub fn exact(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fit: Fit::Fill,
            position: Position::Center,
        }
    }
}

/// Resize a raster according to `opts`.
///
/// # Errors
///
/// Returns an error for a zero target size or a raster with more than four channels.
pub fn resize_raster(raster: &RasterBuffer, opts: &ResizeOptions) -> Result<RasterBuffer> {
    if opts.width == 0 || opts.height == 0 {
        return Err(Error::config("resize", "width and height must be at least 1"));
    }
    if (raster.width, raster.height) == (opts.width, opts.height) {
        return Ok(raster.clone());
    }

    let (sw, sh) = (f64::from(raster.width), f64::from(raster.height));
    let (tw, th) = (f64::from(opts.width), f64::from(opts.height));

    let scaled = |scale: f64| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let dims = (
            ((sw * scale).round() as u32).max(1),
            ((sh * scale).round() as u32).max(1),
        );
        dims
    };

    match opts.fit {
        Fit::Fill => resize_exact(raster, opts.width, opts.height),
        Fit::Inside => {
            let (w, h) = scaled((tw / sw).min(th / sh));
            resize_exact(raster, w.min(opts.width), h.min(opts.height))
        }
        Fit::Outside => {
            let (w, h) = scaled((tw / sw).max(th / sh));
            resize_exact(raster, w.max(opts.width), h.max(opts.height))
        }
        Fit::Cover => {
            let (w, h) = scaled((tw / sw).max(th / sh));
            let resized = resize_exact(raster, w.max(opts.width), h.max(opts.height))?;
            let x = opts.position.offset(resized.width, opts.width, true);
            let y = opts.position.offset(resized.height, opts.height, false);
            Ok(resized.crop(x, y, opts.width, opts.height))
        }
        Fit::Contain => {
            let (w, h) = scaled((tw / sw).min(th / sh));
            let resized = resize_exact(raster, w.min(opts.width), h.min(opts.height))?;
            let x = opts.position.offset(opts.width, resized.width, true);
            let y = opts.position.offset(opts.height, resized.height, false);
            Ok(pad_into(&resized, opts.width, opts.height, x, y))
        }
    }
}

fn resize_exact(raster: &RasterBuffer, width: u32, height: u32) -> Result<RasterBuffer> {
    if (raster.width, raster.height) == (width, height) {
        return Ok(raster.clone());
    }
    let img = raster.to_dynamic()?;
    Ok(RasterBuffer::from_dynamic(img.resize_exact(
        width,
        height,
        FilterType::Lanczos3,
    )))
}

/// Place `raster` at (x, y) on a zeroed canvas of the given size.
fn pad_into(raster: &RasterBuffer, width: u32, height: u32, x: u32, y: u32) -> RasterBuffer {
    let mut canvas = RasterBuffer::zeros(width, height, raster.channels);
    let c = usize::from(raster.channels);
    let row_len = raster.stride();
    for row in 0..raster.height {
        let src = row as usize * row_len;
        let dst = (row + y) as usize * canvas.stride() + x as usize * c;
        canvas.pixels[dst..dst + row_len].copy_from_slice(&raster.pixels[src..src + row_len]);
    }
    canvas
}

/// Crop the centered `width` x `height` region. Dimensions larger than the
/// raster are clipped.
#[must_use]
pub fn center_crop(raster: &RasterBuffer, width: u32, height: u32) -> RasterBuffer {
    let width = width.min(raster.width);
    let height = height.min(raster.height);
    let x = (raster.width - width) / 2;
    let y = (raster.height - height) / 2;
    raster.crop(x, y, width, height)
}

/// Convert to single-channel luma, keeping alpha if present.
///
/// # Errors
///
/// Returns an error for rasters with more than four channels.
pub fn to_grayscale(raster: &RasterBuffer) -> Result<RasterBuffer> {
    match raster.channels {
        1 | 2 => Ok(raster.clone()),
        3 => Ok(RasterBuffer::from_dynamic(
            raster.to_dynamic()?.to_luma8().into(),
        )),
        _ => Ok(RasterBuffer::from_dynamic(
            raster.to_dynamic()?.to_luma_alpha8().into(),
        )),
    }
}
