//! Tiled inference over images larger than a single model input.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use crate::backend::InferenceBackend;
use crate::error::{Error, Result};
use crate::image::RasterBuffer;
use crate::tensor::{to_byte, to_tensor, ChannelOrder, Layout, NormalizeParams, Tensor};

/// Tile extent: one number for square tiles or `[width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TileSize {
    Square(u32),
    Rect([u32; 2]),
}

impl TileSize {
    /// `(width, height)` in pixels.
    #[must_use]
    pub fn dims(self) -> (u32, u32) {
        match self {
            Self::Square(s) => (s, s),
            Self::Rect([w, h]) => (w, h),
        }
    }
}

/// Edge padding requested for tiles. Accepted but not applied: edge tiles
/// are clipped to the image instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadMode {
    #[default]
    None,
    Zero,
    Reflect,
    Replicate,
}

/// Requested overlap blending. The engine always averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Average,
    Feather,
    Max,
}

/// `inference.tiling` configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TilingConfig {
    pub apply: bool,
    pub tile_size: TileSize,
    pub overlap: u32,
    pub pad_mode: PadMode,
    pub blend: BlendMode,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            apply: false,
            tile_size: TileSize::Square(512),
            overlap: 32,
            pad_mode: PadMode::None,
            blend: BlendMode::Average,
        }
    }
}

impl TilingConfig {
    /// Tiling config with the given extent and overlap, enabled.
    #[must_use]
    pub fn new(tile_width: u32, tile_height: u32, overlap: u32) -> Self {
        Self {
            apply: true,
            tile_size: TileSize::Rect([tile_width, tile_height]),
            overlap,
            ..Self::default()
        }
    }

    /// Stride between tile origins, floored at 1 so iteration always advances.
    #[must_use]
    pub fn steps(&self) -> (u32, u32) {
        let (tw, th) = self.tile_size.dims();
        (
            tw.saturating_sub(self.overlap).max(1),
            th.saturating_sub(self.overlap).max(1),
        )
    }

    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] for a zero tile extent.
    pub fn validate(&self) -> Result<()> {
        let (tw, th) = self.tile_size.dims();
        if tw == 0 || th == 0 {
            return Err(Error::config(
                "inference.tiling.tileSize",
                "must be at least 1 in each axis",
            ));
        }
        Ok(())
    }
}

/// Everything the engine needs besides the raster and backend.
#[derive(Debug, Clone, Copy)]
pub struct TileParams<'a> {
    pub tiling: &'a TilingConfig,
    pub normalize: Option<&'a NormalizeParams>,
    pub order: ChannelOrder,
    pub dtype: &'a str,
    /// Multiplier taking backend output to byte units.
    pub scale: f32,
}

/// Reconstructed output of a tiled run.
#[derive(Debug, Clone)]
pub struct TiledOutput {
    /// Averaged, rounded and saturated bytes.
    pub raster: RasterBuffer,
    /// Averaged values in backend units (before scaling).
    pub tensor: Tensor,
}

/// Run `backend` over overlapping tiles of `raster` and average the overlaps.
///
/// Tiles are visited in row-major order. Edge tiles are clipped to the image,
/// so the output always has the input's dimensions.
///
/// # Errors
///
/// Fails on the first tile whose conversion or inference fails, or whose
/// output does not match the tile's size or the first tile's channel count.
pub fn run_tiled(
    raster: &RasterBuffer,
    backend: &mut dyn InferenceBackend,
    params: &TileParams<'_>,
) -> Result<TiledOutput> {
    let tiling = params.tiling;
    tiling.validate()?;

    if tiling.blend != BlendMode::Average || tiling.pad_mode != PadMode::None {
        tracing::warn!(
            "Tiling blend {:?} / pad {:?} requested; overlaps are averaged and edge tiles clipped",
            tiling.blend,
            tiling.pad_mode
        );
    }

    let (img_w, img_h) = (raster.width, raster.height);
    let (tile_w, tile_h) = tiling.tile_size.dims();
    let (step_x, step_y) = tiling.steps();
    let xs: Vec<u32> = (0..img_w).step_by(step_x as usize).collect();
    let ys: Vec<u32> = (0..img_h).step_by(step_y as usize).collect();

    tracing::info!(
        "Tiled inference: {}x{} image, {tile_w}x{tile_h} tiles, step {step_x}x{step_y}, {} tiles",
        img_w,
        img_h,
        xs.len() * ys.len()
    );

    let pb = ProgressBar::new((xs.len() * ys.len()) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Tiles [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let pixel_count = img_w as usize * img_h as usize;
    let mut weight = vec![0_u32; pixel_count];
    let mut sum: Vec<f64> = Vec::new();
    let mut channels: Option<u8> = None;

    for &y in &ys {
        for &x in &xs {
            let actual_w = tile_w.min(img_w - x);
            let actual_h = tile_h.min(img_h - y);
            tracing::trace!("Tile at ({x}, {y}) size {actual_w}x{actual_h}");

            let tile = raster.crop(x, y, actual_w, actual_h);
            let input = to_tensor(&tile, params.normalize, params.order, params.dtype)?;
            let output = backend.infer(&input)?.into_layout(Layout::Nhwc)?;

            if (output.width, output.height) != (actual_w, actual_h) {
                return Err(Error::inference(
                    backend.name(),
                    format!(
                        "tile output is {}x{}, expected {actual_w}x{actual_h}",
                        output.width, output.height
                    ),
                ));
            }

            let c = match channels {
                Some(c) if c == output.channels => c,
                Some(c) => {
                    return Err(Error::inference(
                        backend.name(),
                        format!("tile output has {} channels, expected {c}", output.channels),
                    ))
                }
                None => {
                    sum = vec![0.0; pixel_count * usize::from(output.channels)];
                    channels = Some(output.channels);
                    output.channels
                }
            };
            let c = usize::from(c);

            for row in 0..actual_h as usize {
                for col in 0..actual_w as usize {
                    let px = (y as usize + row) * img_w as usize + x as usize + col;
                    let src = (row * actual_w as usize + col) * c;
                    weight[px] += 1;
                    for (acc, &v) in sum[px * c..(px + 1) * c]
                        .iter_mut()
                        .zip(&output.data[src..src + c])
                    {
                        *acc += f64::from(v * params.scale);
                    }
                }
            }

            pb.inc(1);
        }
    }

    pb.finish_and_clear();

    let channels = channels.unwrap_or(raster.channels);
    let c = usize::from(channels);
    let mut pixels = vec![0_u8; pixel_count * c];
    let mut values = vec![0.0_f32; pixel_count * c];

    for (px, &w) in weight.iter().enumerate() {
        let w = f64::from(w.max(1));
        for i in px * c..(px + 1) * c {
            let avg = sum.get(i).copied().unwrap_or(0.0) / w;
            #[allow(clippy::cast_possible_truncation)]
            let avg = avg as f32;
            pixels[i] = to_byte(avg);
            values[i] = if params.scale == 0.0 {
                avg
            } else {
                avg / params.scale
            };
        }
    }

    Ok(TiledOutput {
        raster: RasterBuffer::new(img_w, img_h, channels, pixels)?,
        tensor: Tensor::new(img_w, img_h, channels, Layout::Nhwc, values)?,
    })
}
