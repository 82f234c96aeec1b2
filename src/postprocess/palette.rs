//! Class-index to palette-color mapping with optional boundary outlines.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::image::RasterBuffer;

/// Non-empty list of RGB colors indexed modulo its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] for an empty color list.
    pub fn new(colors: Vec<[u8; 3]>) -> Result<Self> {
        if colors.is_empty() {
            return Err(Error::config(
                "postprocessing.paletteMap.palette",
                "palette must contain at least one color",
            ));
        }
        Ok(Self { colors })
    }

    /// The 256-entry PASCAL VOC segmentation palette.
    #[must_use]
    pub fn voc() -> Self {
        let colors = (0..256_usize)
            .map(|i| {
                let mut rgb = [0_u8; 3];
                let mut c = i;
                for bit in (0..8).rev() {
                    for (ch, value) in rgb.iter_mut().enumerate() {
                        *value |= u8::from((c >> ch) & 1 == 1) << bit;
                    }
                    c >>= 3;
                }
                rgb
            })
            .collect();
        Self { colors }
    }

    /// Color for `class`, wrapping around the palette.
    #[must_use]
    pub fn color(&self, class: usize) -> [u8; 3] {
        self.colors[class % self.colors.len()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Palette given by name or as explicit colors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PaletteSpec {
    Named(String),
    Colors(Vec<[u8; 3]>),
}

impl Default for PaletteSpec {
    fn default() -> Self {
        Self::Named("voc".to_string())
    }
}

impl PaletteSpec {
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] for unknown names or empty lists.
    pub fn resolve(&self) -> Result<Palette> {
        match self {
            Self::Named(name) if name.eq_ignore_ascii_case("voc") => Ok(Palette::voc()),
            Self::Named(name) => Err(Error::config(
                "postprocessing.paletteMap.palette",
                format!("unknown palette '{name}'"),
            )),
            Self::Colors(colors) => Palette::new(colors.clone()),
        }
    }
}

/// Class boundary outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutlineConfig {
    pub color: [u8; 3],
    /// Outline width in pixels, measured from the class boundary.
    pub thickness: u32,
}

impl Default for OutlineConfig {
    fn default() -> Self {
        Self {
            color: [255, 255, 255],
            thickness: 1,
        }
    }
}

/// `postprocessing.paletteMap`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct PaletteMapConfig {
    pub palette: PaletteSpec,
    /// Channel holding the class index; `None` takes the argmax over channels.
    pub channel: Option<usize>,
    pub outline: Option<OutlineConfig>,
}

/// Per-pixel class indices.
fn class_indices(raster: &RasterBuffer, channel: Option<usize>) -> Result<Vec<usize>> {
    let channels = usize::from(raster.channels);
    let px = raster.pixels.chunks_exact(channels);

    match channel {
        Some(ch) if ch >= channels => Err(Error::config(
            "postprocessing.paletteMap.channel",
            format!("channel {ch} out of range for {channels}-channel image"),
        )),
        Some(ch) => Ok(px.map(|p| usize::from(p[ch])).collect()),
        None => Ok(px
            .map(|p| {
                // first maximum wins
                p.iter()
                    .enumerate()
                    .fold((0, p[0]), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                    .0
            })
            .collect()),
    }
}

/// Pixels whose class differs from the left or top neighbour.
fn boundary_mask(classes: &[usize], width: usize, height: usize) -> Vec<bool> {
    let mut mask = vec![false; classes.len()];
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            let left = x > 0 && classes[i - 1] != classes[i];
            let top = y > 0 && classes[i - width] != classes[i];
            mask[i] = left || top;
        }
    }
    mask
}

/// Grow `mask` by `radius` pixels with a square window (separable max filter).
fn dilate(mask: &[bool], width: usize, height: usize, radius: usize) -> Vec<bool> {
    if radius == 0 {
        return mask.to_vec();
    }

    let mut horizontal = vec![false; mask.len()];
    for y in 0..height {
        let row = &mask[y * width..(y + 1) * width];
        for x in 0..width {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(width - 1);
            horizontal[y * width + x] = row[lo..=hi].iter().any(|&m| m);
        }
    }

    let mut out = vec![false; mask.len()];
    for x in 0..width {
        for y in 0..height {
            let lo = y.saturating_sub(radius);
            let hi = (y + radius).min(height - 1);
            out[y * width + x] = (lo..=hi).any(|yy| horizontal[yy * width + x]);
        }
    }
    out
}

/// Color every pixel by its class and optionally draw class boundaries.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] for a bad palette or channel.
pub fn apply_palette(raster: &RasterBuffer, cfg: &PaletteMapConfig) -> Result<RasterBuffer> {
    let palette = cfg.palette.resolve()?;
    let classes = class_indices(raster, cfg.channel)?;
    let (w, h) = (raster.width as usize, raster.height as usize);

    tracing::debug!(
        "Palette map: {} colors, source {:?}, outline {:?}",
        palette.len(),
        cfg.channel,
        cfg.outline
    );

    let outline = cfg.outline.map(|o| {
        let radius = o.thickness.saturating_sub(1) as usize;
        (o.color, dilate(&boundary_mask(&classes, w, h), w, h, radius))
    });

    let mut pixels = Vec::with_capacity(classes.len() * 3);
    for (i, &class) in classes.iter().enumerate() {
        let color = match &outline {
            Some((color, mask)) if mask[i] => *color,
            _ => palette.color(class),
        };
        pixels.extend_from_slice(&color);
    }

    RasterBuffer::new(raster.width, raster.height, 3, pixels)
}
