//! Luminance tone mapping with chroma preservation.

use serde::Deserialize;

use crate::image::RasterBuffer;
use crate::tensor::to_byte;

/// Rec. 709 luma weights.
const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Luminance below this maps to black.
const MIN_LUMINANCE: f32 = 1e-6;

/// Tone curve applied to exposed luminance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneMapOperator {
    #[default]
    Reinhard,
    #[serde(alias = "filmic")]
    Aces,
}

impl ToneMapOperator {
    fn apply(self, y: f32) -> f32 {
        match self {
            Self::Reinhard => y / (1.0 + y),
            Self::Aces => {
                const A: f32 = 2.51;
                const B: f32 = 0.03;
                const C: f32 = 2.43;
                const D: f32 = 0.59;
                const E: f32 = 0.14;
                (y * A.mul_add(y, B)) / y.mul_add(C.mul_add(y, D), E)
            }
        }
    }
}

/// `postprocessing.toneMap`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ToneMapConfig {
    pub operator: ToneMapOperator,
    /// Stops of exposure; luminance is multiplied by `2^exposure`.
    pub exposure: f32,
    /// Display gamma; applied as `y^(1/gamma)` when positive.
    pub gamma: Option<f32>,
}

/// Tone-map color channels, leaving alpha untouched.
///
/// Luminance comes from RGB for rasters with three or more channels, or from
/// channel 0 otherwise. Every color channel is rescaled by `mapped / Y`.
pub fn tone_map(raster: &mut RasterBuffer, cfg: &ToneMapConfig) {
    let channels = usize::from(raster.channels);
    let color = if channels >= 3 { 3 } else { 1 };
    let exposure = cfg.exposure.exp2();
    let inv_gamma = cfg.gamma.filter(|&g| g > 0.0).map(|g| 1.0 / g);

    tracing::debug!(
        "Tone map {:?}: exposure x{exposure}, gamma {:?}",
        cfg.operator,
        cfg.gamma
    );

    for px in raster.pixels.chunks_exact_mut(channels) {
        let mut values = [0.0_f32; 3];
        for (v, &b) in values.iter_mut().zip(&px[..color]) {
            *v = f32::from(b) / 255.0;
        }

        let y = if color == 3 {
            LUMA[0].mul_add(values[0], LUMA[1].mul_add(values[1], LUMA[2] * values[2]))
        } else {
            values[0]
        };

        let mut mapped = cfg.operator.apply(y * exposure);
        if let Some(inv) = inv_gamma {
            mapped = mapped.max(0.0).powf(inv);
        }
        let scale = if y < MIN_LUMINANCE { 0.0 } else { mapped / y };

        for (b, v) in px[..color].iter_mut().zip(values) {
            *b = to_byte(v * scale * 255.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(v: u8) -> RasterBuffer {
        RasterBuffer::new(1, 1, 1, vec![v]).unwrap()
    }

    #[test]
    fn test_reinhard_on_gray() {
        let mut r = gray(255);
        tone_map(&mut r, &ToneMapConfig::default());
        // 1 / (1 + 1) = 0.5
        assert_eq!(r.pixels, vec![128]);
    }

    #[test]
    fn test_aces_white_point() {
        let mut r = gray(255);
        let cfg = ToneMapConfig {
            operator: ToneMapOperator::Aces,
            ..ToneMapConfig::default()
        };
        tone_map(&mut r, &cfg);
        // (2.51 + 0.03) / (2.43 + 0.59 + 0.14) = 0.8038
        assert_eq!(r.pixels, vec![205]);
    }

    #[test]
    fn test_black_stays_black() {
        let mut r = RasterBuffer::new(1, 1, 3, vec![0, 0, 0]).unwrap();
        tone_map(&mut r, &ToneMapConfig { exposure: 4.0, ..ToneMapConfig::default() });
        assert_eq!(r.pixels, vec![0, 0, 0]);
    }

    #[test]
    fn test_preserves_chroma_ratio_and_alpha() {
        let mut r = RasterBuffer::new(1, 1, 4, vec![200, 100, 50, 77]).unwrap();
        tone_map(&mut r, &ToneMapConfig::default());
        let px = r.pixel(0, 0);
        assert_eq!(px[3], 77);
        let ratio = f32::from(px[0]) / f32::from(px[1]);
        assert!((ratio - 2.0).abs() < 0.05, "ratio {ratio}");
        assert!(px[0] < 200);
    }

    #[test]
    fn test_exposure_brightens() {
        let mut dim = gray(60);
        let mut bright = gray(60);
        tone_map(&mut dim, &ToneMapConfig::default());
        tone_map(&mut bright, &ToneMapConfig { exposure: 2.0, ..ToneMapConfig::default() });
        assert!(bright.pixels[0] > dim.pixels[0]);
    }

    #[test]
    fn test_gamma_lifts_midtones() {
        let mut plain = gray(128);
        let mut lifted = gray(128);
        tone_map(&mut plain, &ToneMapConfig::default());
        tone_map(&mut lifted, &ToneMapConfig { gamma: Some(2.2), ..ToneMapConfig::default() });
        assert!(lifted.pixels[0] > plain.pixels[0]);
    }

    #[test]
    fn test_filmic_alias() {
        let cfg: ToneMapConfig = serde_json::from_str(r#"{"operator": "filmic"}"#).unwrap();
        assert_eq!(cfg.operator, ToneMapOperator::Aces);
    }
}
