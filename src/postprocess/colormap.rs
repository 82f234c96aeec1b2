//! Single-channel to RGB colormaps.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::image::RasterBuffer;

/// Control point of a gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub t: f32,
    pub color: [u8; 3],
}

const fn stop(t: f32, r: u8, g: u8, b: u8) -> ColorStop {
    ColorStop { t, color: [r, g, b] }
}

const VIRIDIS: [ColorStop; 9] = [
    stop(0.0, 68, 1, 84),
    stop(0.125, 71, 44, 122),
    stop(0.25, 59, 81, 139),
    stop(0.375, 44, 113, 142),
    stop(0.5, 33, 144, 141),
    stop(0.625, 39, 173, 129),
    stop(0.75, 92, 200, 99),
    stop(0.875, 170, 220, 50),
    stop(1.0, 253, 231, 37),
];

const MAGMA: [ColorStop; 9] = [
    stop(0.0, 0, 0, 4),
    stop(0.125, 28, 16, 68),
    stop(0.25, 79, 18, 123),
    stop(0.375, 129, 37, 129),
    stop(0.5, 181, 54, 122),
    stop(0.625, 229, 80, 100),
    stop(0.75, 251, 135, 97),
    stop(0.875, 254, 194, 135),
    stop(1.0, 252, 253, 191),
];

const PLASMA: [ColorStop; 9] = [
    stop(0.0, 13, 8, 135),
    stop(0.125, 84, 2, 163),
    stop(0.25, 126, 3, 168),
    stop(0.375, 168, 34, 150),
    stop(0.5, 204, 71, 120),
    stop(0.625, 230, 108, 92),
    stop(0.75, 248, 149, 64),
    stop(0.875, 253, 197, 39),
    stop(1.0, 240, 249, 33),
];

const INFERNO: [ColorStop; 9] = [
    stop(0.0, 0, 0, 4),
    stop(0.125, 31, 12, 72),
    stop(0.25, 85, 15, 109),
    stop(0.375, 136, 34, 106),
    stop(0.5, 186, 54, 85),
    stop(0.625, 227, 89, 51),
    stop(0.75, 249, 140, 10),
    stop(0.875, 249, 201, 50),
    stop(1.0, 252, 255, 164),
];

/// Built-in colormaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[serde(alias = "gray", alias = "grey")]
    Grayscale,
    #[default]
    Viridis,
    Magma,
    Plasma,
    Inferno,
}

impl Colormap {
    /// Gradient control points; empty for grayscale.
    #[must_use]
    pub fn stops(self) -> &'static [ColorStop] {
        match self {
            Self::Grayscale => &[],
            Self::Viridis => &VIRIDIS,
            Self::Magma => &MAGMA,
            Self::Plasma => &PLASMA,
            Self::Inferno => &INFERNO,
        }
    }
}

/// Map a byte value to RGB by piecewise-linear interpolation between stops.
#[must_use]
pub fn map_value_to_color(value: u8, cmap: Colormap) -> [u8; 3] {
    let stops = cmap.stops();
    if stops.is_empty() {
        return [value, value, value];
    }

    let t = f32::from(value) / 255.0;
    let idx = stops
        .windows(2)
        .position(|pair| t <= pair[1].t)
        .unwrap_or(stops.len() - 2);
    let (lo, hi) = (stops[idx], stops[idx + 1]);
    let local = ((t - lo.t) / (hi.t - lo.t)).clamp(0.0, 1.0);

    let mut out = [0_u8; 3];
    for (o, (&a, &b)) in out.iter_mut().zip(lo.color.iter().zip(&hi.color)) {
        let v = (f32::from(b) - f32::from(a)).mul_add(local, f32::from(a));
        *o = crate::tensor::to_byte(v);
    }
    out
}

/// `postprocessing.colorMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ColorMapConfig {
    pub name: Colormap,
    /// Source channel index.
    pub channel: usize,
}

/// Replace each pixel with the colormap color of its selected channel.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] if the channel does not exist.
pub fn apply_colormap(raster: &RasterBuffer, cfg: &ColorMapConfig) -> Result<RasterBuffer> {
    let channels = usize::from(raster.channels);
    if cfg.channel >= channels {
        return Err(Error::config(
            "postprocessing.colorMap.channel",
            format!("channel {} out of range for {channels}-channel image", cfg.channel),
        ));
    }

    tracing::debug!("Colormap {:?} on channel {}", cfg.name, cfg.channel);

    let pixels = raster
        .pixels
        .chunks_exact(channels)
        .flat_map(|px| map_value_to_color(px[cfg.channel], cfg.name))
        .collect();
    RasterBuffer::new(raster.width, raster.height, 3, pixels)
}
