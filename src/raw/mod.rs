//! Raw tensor dumps in NumPy formats.

mod npy;
mod npz;

pub use npy::{npy_bytes, write_npy_to, RawData};
pub use npz::{npz_bytes, NpzWriter};

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::tensor::{from_tensor, Dtype, Tensor};

/// Container format of a raw dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawFormat {
    #[default]
    Npy,
    Npz,
}

impl RawFormat {
    /// Format named by a `.npy` or `.npz` extension, case-insensitively.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("npy") {
            Some(Self::Npy)
        } else if ext.eq_ignore_ascii_case("npz") {
            Some(Self::Npz)
        } else {
            None
        }
    }
}

fn default_dtype() -> String {
    "float32".to_string()
}

fn default_name() -> String {
    "arr0".to_string()
}

/// `output.saveRaw`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SaveRawConfig {
    #[serde(default)]
    pub format: RawFormat,
    #[serde(default = "default_dtype")]
    pub dtype: String,
    pub path: PathBuf,
    /// Member name inside an `.npz` archive.
    #[serde(default = "default_name")]
    pub name: String,
}

impl SaveRawConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            format: RawFormat::default(),
            dtype: default_dtype(),
            path: path.into(),
            name: default_name(),
        }
    }

    /// Redirect the dump to `path`, following its extension's format.
    ///
    /// An unrecognized extension keeps the current format.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        if let Some(format) = RawFormat::from_path(&self.path) {
            self.format = format;
        }
        self
    }
}

/// Write `tensor` as an `(H, W, C)` array.
///
/// With dtype `uint8` the values are first converted to bytes with `scale`.
///
/// # Errors
///
/// Returns [`Error::UnsupportedDtype`] for dtypes other than float32/uint8,
/// or an I/O error.
pub fn save_raw(tensor: &Tensor, cfg: &SaveRawConfig, scale: f32) -> Result<()> {
    let dtype =
        Dtype::from_name(&cfg.dtype).ok_or_else(|| Error::UnsupportedDtype(cfg.dtype.clone()))?;

    let tensor = tensor.clone().into_layout(crate::tensor::Layout::Nhwc)?;
    let shape = [
        tensor.height as usize,
        tensor.width as usize,
        usize::from(tensor.channels),
    ];

    let bytes;
    let data = match dtype {
        Dtype::Float32 => RawData::Float32(&tensor.data),
        Dtype::Uint8 => {
            bytes = from_tensor(&tensor, scale)?.pixels;
            RawData::Uint8(&bytes)
        }
    };

    if let Some(parent) = cfg.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(&cfg.path)?);

    match cfg.format {
        RawFormat::Npy => {
            write_npy_to(&mut writer, &shape, data)?;
            writer.flush()?;
        }
        RawFormat::Npz => {
            let mut npz = NpzWriter::new(writer);
            npz.add_array(&cfg.name, &shape, data)?;
            npz.finish()?;
        }
    }

    tracing::info!(
        "Saved raw tensor {:?} ({:?}, {}) to {}",
        shape,
        cfg.format,
        cfg.dtype,
        cfg.path.display()
    );
    Ok(())
}
