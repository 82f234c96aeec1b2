//! Float tensors and the raster <-> tensor conversions.

mod builder;
mod layout;

pub use builder::{from_tensor, to_tensor};
pub(crate) use builder::to_byte;
pub use layout::{infer_output_layout, OutputDims};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Memory layout of a single-image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Channels-last (height, width, channels).
    #[default]
    Nhwc,
    /// Channels-first (channels, height, width).
    Nchw,
}

/// Channel order of the tensor fed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Numeric element type of a tensor or raw dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Float32,
    Uint8,
}

impl Dtype {
    /// Parse a dtype name, returning `None` for anything unsupported.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "float32" | "f32" => Some(Self::Float32),
            "uint8" | "u8" => Some(Self::Uint8),
            _ => None,
        }
    }
}

/// Per-channel normalization statistics, applied to the first three channels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// A single-image float tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub layout: Layout,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that `data` matches the declared shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the length is wrong.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        layout: Layout,
        data: Vec<f32>,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * usize::from(channels);
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: format!("{width}x{height}x{channels} ({expected} values)"),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            layout,
            data,
        })
    }

    /// A zero-filled tensor.
    #[must_use]
    pub fn zeros(width: u32, height: u32, channels: u8, layout: Layout) -> Self {
        let len = width as usize * height as usize * usize::from(channels);
        Self {
            width,
            height,
            channels,
            layout,
            data: vec![0.0; len],
        }
    }

    /// Number of pixels (width * height).
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Shape in the tensor's own layout, with a leading batch axis of 1.
    #[must_use]
    pub fn batched_shape(&self) -> [usize; 4] {
        let (h, w, c) = (
            self.height as usize,
            self.width as usize,
            usize::from(self.channels),
        );
        match self.layout {
            Layout::Nhwc => [1, h, w, c],
            Layout::Nchw => [1, c, h, w],
        }
    }
}
