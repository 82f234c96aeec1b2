//! Fused activation, clamp and denormalize byte loop.

use serde::Deserialize;

use crate::image::RasterBuffer;
use crate::tensor::to_byte;

/// Output activation applied to `[0, 1]` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    None,
    Sigmoid,
    Tanh,
}

impl Activation {
    fn apply(self, v: f32) -> f32 {
        match self {
            Self::None => v,
            Self::Sigmoid => 1.0 / (1.0 + (-v.mul_add(2.0, -1.0)).exp()),
            Self::Tanh => v.mul_add(2.0, -1.0).tanh().mul_add(0.5, 0.5),
        }
    }
}

/// `postprocessing.clamp`. Bounds are limited to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClampConfig {
    pub min: f32,
    pub max: f32,
}

impl Default for ClampConfig {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// `postprocessing.denormalize`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DenormalizeConfig {
    pub scale: f32,
}

impl Default for DenormalizeConfig {
    fn default() -> Self {
        Self { scale: 255.0 }
    }
}

/// Apply activation, clamp and denormalize to every channel in one pass.
///
/// Each byte becomes `v = b / 255`, goes through the activation, is clamped,
/// multiplied by `scale / 255`, and is written back as `round(v * 255)`.
pub fn apply_value_transforms(
    raster: &mut RasterBuffer,
    activation: Activation,
    clamp: Option<&ClampConfig>,
    denormalize: Option<&DenormalizeConfig>,
) {
    let bounds = clamp.map(|c| (c.min.max(0.0), c.max.min(1.0)));
    let factor = denormalize.map(|d| d.scale / 255.0);

    tracing::debug!("Value transforms: {activation:?}, clamp {bounds:?}, factor {factor:?}");

    for byte in &mut raster.pixels {
        let mut v = activation.apply(f32::from(*byte) / 255.0);
        if let Some((lo, hi)) = bounds {
            v = v.max(lo).min(hi);
        }
        if let Some(factor) = factor {
            v *= factor;
        }
        *byte = to_byte(v * 255.0);
    }
}
