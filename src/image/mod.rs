//! Raster buffers and the image-library boundary (decode, resize, encode).

mod load;
mod ops;
mod save;

pub use load::{decode_raster, load_raster};
pub use ops::{center_crop, resize_raster, to_grayscale, Fit, Position, ResizeOptions};
pub use save::{encode_raster, output_format, save_raster};

use image::{DynamicImage, ImageBuffer};

use crate::error::{Error, Result};

/// Row-major, 8-bit-per-channel pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl RasterBuffer {
    /// Wrap existing pixel data, checking its length against the dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] on a length mismatch or zero channels.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * usize::from(channels);
        if channels == 0 || pixels.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: format!("{width}x{height}x{channels} ({expected} bytes)"),
                actual: format!("{} bytes", pixels.len()),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    /// A zero-filled buffer.
    #[must_use]
    pub fn zeros(width: u32, height: u32, channels: u8) -> Self {
        let len = width as usize * height as usize * usize::from(channels);
        Self {
            width,
            height,
            channels,
            pixels: vec![0; len],
        }
    }

    /// Bytes per row.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.width as usize * usize::from(self.channels)
    }

    /// The channel values of the pixel at (x, y).
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = usize::from(self.channels);
        let start = y as usize * self.stride() + x as usize * c;
        &self.pixels[start..start + c]
    }

    /// Copy out the `width` x `height` region whose top-left corner is (x, y).
    ///
    /// The region is clipped to the buffer bounds.
    #[must_use]
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let width = width.min(self.width - x);
        let height = height.min(self.height - y);

        let c = usize::from(self.channels);
        let row_len = width as usize * c;
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in y..y + height {
            let start = row as usize * self.stride() + x as usize * c;
            pixels.extend_from_slice(&self.pixels[start..start + row_len]);
        }

        Self {
            width,
            height,
            channels: self.channels,
            pixels,
        }
    }

    /// Convert a decoded image, narrowing anything wider than 8 bits per channel.
    #[must_use]
    pub fn from_dynamic(img: DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        let (channels, pixels) = match img {
            DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (2, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (3, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (4, buf.into_raw()),
            other => match other.color().channel_count() {
                1 => (1, other.to_luma8().into_raw()),
                2 => (2, other.to_luma_alpha8().into_raw()),
                3 => (3, other.to_rgb8().into_raw()),
                _ => (4, other.to_rgba8().into_raw()),
            },
        };
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    /// Convert to an `image` crate buffer for resizing or encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] for buffers with more than four channels.
    pub fn to_dynamic(&self) -> Result<DynamicImage> {
        let (w, h) = (self.width, self.height);
        let pixels = self.pixels.clone();
        let img = match self.channels {
            1 => ImageBuffer::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
            2 => ImageBuffer::from_raw(w, h, pixels).map(DynamicImage::ImageLumaA8),
            3 => ImageBuffer::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
            4 => ImageBuffer::from_raw(w, h, pixels).map(DynamicImage::ImageRgba8),
            n => {
                return Err(Error::UnsupportedFormat(format!(
                    "{n}-channel raster cannot be converted to an image"
                )))
            }
        };
        img.ok_or_else(|| Error::ShapeMismatch {
            expected: format!("{w}x{h}x{} bytes", self.channels),
            actual: format!("{} bytes", self.pixels.len()),
        })
    }
}
