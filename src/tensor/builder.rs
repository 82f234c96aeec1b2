//! Raster buffer <-> tensor conversion.

use super::{ChannelOrder, Dtype, Layout, NormalizeParams, Tensor};
use crate::error::{Error, Result};
use crate::image::RasterBuffer;

/// Convert a raster into an NHWC float tensor.
///
/// Each byte becomes `raw / 255`, then `(v - mean[c]) / std[c]` on the first
/// three channels when `normalize` is given. `dtype` is only checked: `uint8`
/// and `float32` produce the same values, since backends always receive
/// float data. With [`ChannelOrder::Bgr`] and at least three channels,
/// channels 0 and 2 are swapped after normalizing.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] if `dtype` is neither `float32` nor `uint8`.
pub fn to_tensor(
    raster: &RasterBuffer,
    normalize: Option<&NormalizeParams>,
    order: ChannelOrder,
    dtype: &str,
) -> Result<Tensor> {
    if Dtype::from_name(dtype).is_none() {
        return Err(Error::UnsupportedFormat(format!("tensor dtype '{dtype}'")));
    }

    let channels = usize::from(raster.channels);
    let swap = order == ChannelOrder::Bgr && channels >= 3;

    let mut data = vec![0.0_f32; raster.pixels.len()];
    for (src, dst) in raster
        .pixels
        .chunks_exact(channels)
        .zip(data.chunks_exact_mut(channels))
    {
        for (c, &raw) in src.iter().enumerate() {
            let unit = f32::from(raw) / 255.0;
            let v = match normalize {
                Some(params) if c < 3 => (unit - params.mean[c]) / params.std[c],
                _ => unit,
            };
            let out = match c {
                0 if swap => 2,
                2 if swap => 0,
                _ => c,
            };
            dst[out] = v;
        }
    }

    Tensor::new(
        raster.width,
        raster.height,
        raster.channels,
        Layout::Nhwc,
        data,
    )
}

/// Convert a tensor back to bytes with `clamp(round(v * scale), 0, 255)`.
///
/// NCHW tensors are transposed to interleaved order first.
///
/// # Errors
///
/// Returns an error if the tensor data does not match its declared shape.
pub fn from_tensor(tensor: &Tensor, scale: f32) -> Result<RasterBuffer> {
    let tensor = tensor.clone().into_layout(Layout::Nhwc)?;
    let pixels = tensor.data.iter().map(|&v| to_byte(v * scale)).collect();
    RasterBuffer::new(tensor.width, tensor.height, tensor.channels, pixels)
}

/// Round and saturate a value in byte units.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn to_byte(v: f32) -> u8 {
    // NaN saturates to 0 through the `as` cast
    v.round().clamp(0.0, 255.0) as u8
}
