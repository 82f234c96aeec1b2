//! Pipeline configuration, one plain struct per stage.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::backend::BackendKind;
use crate::error::{Error, Result};
use crate::image::ResizeOptions;
use crate::postprocess::PostprocessConfig;
use crate::raw::SaveRawConfig;
use crate::tensor::{ChannelOrder, Dtype, Layout, NormalizeParams};
use crate::tiling::TilingConfig;

/// `"auto"` keyword of [`Concurrency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoKeyword {
    Auto,
}

/// Worker thread knob handed to the runtime.
///
/// Only the ONNX session honors it, as its intra-op thread count. Image
/// decoding and resizing run on the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Concurrency {
    Auto(AutoKeyword),
    Threads(usize),
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::Auto(AutoKeyword::Auto)
    }
}

impl Concurrency {
    /// Explicit thread count, or `None` for the runtime default.
    #[must_use]
    pub fn threads(self) -> Option<usize> {
        match self {
            Self::Auto(_) => None,
            Self::Threads(n) => Some(n),
        }
    }
}

/// `preprocessing.centerCrop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CropConfig {
    pub width: u32,
    pub height: u32,
}

fn default_dtype() -> String {
    "float32".to_string()
}

/// `preprocessing.format`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TensorFormat {
    pub dtype: String,
    pub channel_order: ChannelOrder,
    /// Layout fed to the backend; `None` uses the backend's native layout.
    pub layout: Option<Layout>,
}

impl Default for TensorFormat {
    fn default() -> Self {
        Self {
            dtype: default_dtype(),
            channel_order: ChannelOrder::Rgb,
            layout: None,
        }
    }
}

/// `preprocessing` section.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreprocessConfig {
    pub resize: Option<ResizeOptions>,
    pub center_crop: Option<CropConfig>,
    pub normalize: Option<NormalizeParams>,
    pub format: TensorFormat,
    pub grayscale: bool,
}

/// `inference` section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InferenceConfig {
    /// Explicit backend; inferred from the model extension when absent.
    pub backend: Option<BackendKind>,
    pub model: Option<PathBuf>,
    /// Run one throwaway inference before the real one.
    pub warmup: bool,
    pub tiling: TilingConfig,
}

fn default_quality() -> u8 {
    90
}

/// `output` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    /// Encoder name; taken from the output extension when absent.
    pub format: Option<String>,
    /// JPEG quality (1-100).
    #[serde(default = "default_quality")]
    pub quality: u8,
    pub save_raw: Option<SaveRawConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: None,
            quality: default_quality(),
            save_raw: None,
        }
    }
}

/// Complete pipeline configuration. Every field is optional.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub concurrency: Concurrency,
    pub preprocessing: PreprocessConfig,
    pub inference: InferenceConfig,
    pub postprocessing: PostprocessConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Parse a JSON configuration string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] for malformed JSON or unknown enum values.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error or [`Error::ConfigParse`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Reading config from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Range-check values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.threads() == Some(0) {
            return Err(Error::config("concurrency", "must be \"auto\" or at least 1"));
        }

        let pre = &self.preprocessing;
        if let Some(resize) = &pre.resize {
            if resize.width == 0 || resize.height == 0 {
                return Err(Error::config(
                    "preprocessing.resize",
                    "width and height must be at least 1",
                ));
            }
        }
        if let Some(crop) = &pre.center_crop {
            if crop.width == 0 || crop.height == 0 {
                return Err(Error::config(
                    "preprocessing.centerCrop",
                    "width and height must be at least 1",
                ));
            }
        }
        if let Some(norm) = &pre.normalize {
            if norm.std.iter().any(|&s| s == 0.0 || !s.is_finite()) {
                return Err(Error::config(
                    "preprocessing.normalize.std",
                    "must be finite and non-zero",
                ));
            }
        }
        if Dtype::from_name(&pre.format.dtype).is_none() {
            return Err(Error::config(
                "preprocessing.format.dtype",
                format!("unsupported dtype '{}'", pre.format.dtype),
            ));
        }

        self.inference.tiling.validate()?;

        if !(1..=100).contains(&self.output.quality) {
            return Err(Error::config("output.quality", "must be between 1 and 100"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Fit;
    use crate::postprocess::{Activation, Colormap};
    use crate::raw::RawFormat;
    use crate::tiling::{BlendMode, TileSize};

    #[test]
    fn test_empty_config_defaults() {
        let cfg = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.concurrency.threads(), None);
        assert_eq!(cfg.preprocessing.format.dtype, "float32");
        assert!(!cfg.inference.tiling.apply);
        assert_eq!(cfg.output.quality, 90);
        assert!(cfg.output.save_raw.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_full_config_parses() {
        let cfg = PipelineConfig::from_json(
            r#"{
                "concurrency": 4,
                "preprocessing": {
                    "resize": {"width": 512, "height": 256, "fit": "cover"},
                    "centerCrop": {"width": 224, "height": 224},
                    "normalize": {"mean": [0.5, 0.5, 0.5], "std": [0.5, 0.5, 0.5]},
                    "format": {"dtype": "float32", "channelOrder": "bgr", "layout": "nchw"},
                    "grayscale": false
                },
                "inference": {
                    "backend": "onnx",
                    "model": "model.onnx",
                    "warmup": true,
                    "tiling": {
                        "apply": true,
                        "tileSize": [256, 128],
                        "overlap": 16,
                        "blend": "feather"
                    }
                },
                "postprocessing": {
                    "activation": "sigmoid",
                    "colorMap": {"name": "magma"},
                    "resizeTo": "input"
                },
                "output": {
                    "format": "jpeg",
                    "quality": 80,
                    "saveRaw": {"format": "npz", "path": "out.npz"}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.concurrency.threads(), Some(4));
        assert_eq!(cfg.preprocessing.resize.unwrap().fit, Fit::Cover);
        assert_eq!(cfg.preprocessing.format.channel_order, ChannelOrder::Bgr);
        assert_eq!(cfg.preprocessing.format.layout, Some(Layout::Nchw));
        assert_eq!(cfg.inference.backend, Some(BackendKind::Onnx));
        assert_eq!(cfg.inference.tiling.tile_size, TileSize::Rect([256, 128]));
        assert_eq!(cfg.inference.tiling.blend, BlendMode::Feather);
        assert_eq!(cfg.postprocessing.activation, Some(Activation::Sigmoid));
        assert_eq!(cfg.postprocessing.color_map.unwrap().name, Colormap::Magma);
        let raw = cfg.output.save_raw.as_ref().unwrap();
        assert_eq!(raw.format, RawFormat::Npz);
        assert_eq!(raw.name, "arr0");
        cfg.validate().unwrap();
    }

    #[test]
    fn test_auto_concurrency() {
        let cfg = PipelineConfig::from_json(r#"{"concurrency": "auto"}"#).unwrap();
        assert_eq!(cfg.concurrency, Concurrency::default());
        assert!(PipelineConfig::from_json(r#"{"concurrency": "many"}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = PipelineConfig::from_json(r#"{"output": {"quality": 0}}"#).unwrap();
        assert!(matches!(cfg.validate(), Err(Error::ConfigValidation { .. })));

        let cfg =
            PipelineConfig::from_json(r#"{"preprocessing": {"format": {"dtype": "int64"}}}"#)
                .unwrap();
        assert!(cfg.validate().is_err());

        let cfg = PipelineConfig::from_json(r#"{"inference": {"tiling": {"tileSize": 0}}}"#)
            .unwrap();
        assert!(cfg.validate().is_err());

        let cfg = PipelineConfig::from_json(r#"{"concurrency": 0}"#).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, r#"{"inference": {"warmup": true}}"#).unwrap();
        let cfg = PipelineConfig::from_file(&path).unwrap();
        assert!(cfg.inference.warmup);
        assert!(PipelineConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
