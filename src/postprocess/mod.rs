//! Postprocessing chain applied to the raster built from the model output.
//!
//! Stages run in a fixed order and each one only when configured:
//! value transforms, tone mapping, colormap, palette map, resize, blend overlay.

mod activation;
mod colormap;
mod overlay;
mod palette;
mod tonemap;

pub use activation::{apply_value_transforms, Activation, ClampConfig, DenormalizeConfig};
pub use colormap::{apply_colormap, map_value_to_color, ColorMapConfig, ColorStop, Colormap};
pub use overlay::{blend_overlay, resize_to, BlendOverlayConfig, ResizeKeyword, ResizeTo};
pub use palette::{apply_palette, OutlineConfig, Palette, PaletteMapConfig, PaletteSpec};
pub use tonemap::{tone_map, ToneMapConfig, ToneMapOperator};

use serde::Deserialize;

use crate::error::Result;
use crate::image::RasterBuffer;

/// Tensor-to-byte scale used when no denormalize stage is configured.
pub const DEFAULT_SCALE: f32 = 255.0;

/// `postprocessing` section. Absent stages are disabled.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PostprocessConfig {
    pub activation: Option<Activation>,
    pub clamp: Option<ClampConfig>,
    pub denormalize: Option<DenormalizeConfig>,
    pub tone_map: Option<ToneMapConfig>,
    pub color_map: Option<ColorMapConfig>,
    pub palette_map: Option<PaletteMapConfig>,
    pub resize_to: Option<ResizeTo>,
    pub blend_overlay: Option<BlendOverlayConfig>,
}

impl PostprocessConfig {
    /// Scale applied when converting model output to bytes.
    #[must_use]
    pub fn denormalize_scale(&self) -> f32 {
        self.denormalize.map_or(DEFAULT_SCALE, |d| d.scale)
    }

    fn has_value_transforms(&self) -> bool {
        self.activation.is_some_and(|a| a != Activation::None)
            || self.clamp.is_some()
            || self.denormalize.is_some()
    }
}

/// Run every configured stage over `raster`.
///
/// `original` is the decoded input before preprocessing. It is used by
/// `resizeTo: "input"` and the blend overlay.
///
/// # Errors
///
/// Returns the first stage error.
pub fn apply_chain(
    mut raster: RasterBuffer,
    cfg: &PostprocessConfig,
    original: &RasterBuffer,
) -> Result<RasterBuffer> {
    if cfg.has_value_transforms() {
        apply_value_transforms(
            &mut raster,
            cfg.activation.unwrap_or_default(),
            cfg.clamp.as_ref(),
            cfg.denormalize.as_ref(),
        );
    }

    if let Some(tm) = &cfg.tone_map {
        tone_map(&mut raster, tm);
    }

    if let Some(cm) = &cfg.color_map {
        raster = apply_colormap(&raster, cm)?;
    }

    if let Some(pm) = &cfg.palette_map {
        raster = apply_palette(&raster, pm)?;
    }

    if let Some(target) = &cfg.resize_to {
        raster = resize_to(&raster, target, (original.width, original.height))?;
    }

    if let Some(blend) = &cfg.blend_overlay {
        raster = blend_overlay(&raster, original, blend.alpha)?;
    }

    tracing::debug!(
        "Postprocess output: {}x{}x{}",
        raster.width,
        raster.height,
        raster.channels
    );
    Ok(raster)
}
