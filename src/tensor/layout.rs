//! NHWC/NCHW conversion and output shape inference.

use ndarray::Array3;

use super::{Layout, Tensor};
use crate::error::{Error, Result};

/// Spatial and channel extent recovered from a backend output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDims {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub layout: Layout,
}

impl Tensor {
    /// Convert the tensor to `layout`, transposing the data if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the data does not match the declared shape.
    pub fn into_layout(self, layout: Layout) -> Result<Self> {
        if self.layout == layout {
            return Ok(self);
        }

        let (h, w, c) = (
            self.height as usize,
            self.width as usize,
            usize::from(self.channels),
        );
        let data = match (self.layout, layout) {
            (Layout::Nhwc, Layout::Nchw) => {
                let arr = Array3::from_shape_vec((h, w, c), self.data).map_err(shape_error)?;
                arr.permuted_axes([2, 0, 1]).iter().copied().collect()
            }
            (Layout::Nchw, Layout::Nhwc) => {
                let arr = Array3::from_shape_vec((c, h, w), self.data).map_err(shape_error)?;
                arr.permuted_axes([1, 2, 0]).iter().copied().collect()
            }
            _ => unreachable!("identical layouts returned early"),
        };

        Ok(Self {
            layout,
            data,
            ..self
        })
    }
}

fn shape_error(err: ndarray::ShapeError) -> Error {
    Error::ShapeMismatch {
        expected: "data length matching tensor dimensions".to_string(),
        actual: err.to_string(),
    }
}

/// Derive width, height and channel count from a backend output shape.
///
/// A `[1, d1, d2, d3]` shape is channels-first when `requested` is
/// [`Layout::Nchw`], or when `d1 <= 4` while both `d2` and `d3` exceed 4.
/// Everything else is read as channels-last. A 3D shape follows the same
/// rule without the batch axis, and a 2D shape is a single-channel map.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] for any other rank, a batch other than 1,
/// a zero/negative extent or a channel count above 255.
pub fn infer_output_layout(shape: &[i64], requested: Layout) -> Result<OutputDims> {
    let dims = shape
        .iter()
        .map(|&d| usize::try_from(d).ok().filter(|&d| d > 0))
        .collect::<Option<Vec<usize>>>()
        .ok_or_else(|| unsupported_shape(shape))?;

    let (width, height, channels, layout) = match dims.as_slice() {
        [1, d1, d2, d3] | [d1, d2, d3] => {
            let channels_first = requested == Layout::Nchw || (*d1 <= 4 && *d2 > 4 && *d3 > 4);
            if channels_first {
                (*d3, *d2, *d1, Layout::Nchw)
            } else {
                (*d2, *d1, *d3, Layout::Nhwc)
            }
        }
        [h, w] => (*w, *h, 1, Layout::Nhwc),
        _ => return Err(unsupported_shape(shape)),
    };

    Ok(OutputDims {
        width: u32::try_from(width).map_err(|_| unsupported_shape(shape))?,
        height: u32::try_from(height).map_err(|_| unsupported_shape(shape))?,
        channels: u8::try_from(channels).map_err(|_| unsupported_shape(shape))?,
        layout,
    })
}

fn unsupported_shape(shape: &[i64]) -> Error {
    Error::ShapeMismatch {
        expected: "[1, d1, d2, d3], [d1, d2, d3] or [h, w] with positive extents".to_string(),
        actual: format!("{shape:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(w: u32, h: u32, c: u8) -> Tensor {
        #[allow(clippy::cast_precision_loss)]
        let data = (0..w as usize * h as usize * usize::from(c))
            .map(|i| i as f32)
            .collect();
        Tensor::new(w, h, c, Layout::Nhwc, data).unwrap()
    }

    #[test]
    fn test_nhwc_to_nchw_positions() {
        let t = pattern(3, 2, 2).into_layout(Layout::Nchw).unwrap();
        // channel 0 plane first, then channel 1
        assert_eq!(t.data, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 1.0, 3.0, 5.0, 7.0, 9.0, 11.0]);
        assert_eq!(t.layout, Layout::Nchw);
    }

    #[test]
    fn test_transpose_back_restores_data() {
        let original = pattern(7, 5, 3);
        let back = original
            .clone()
            .into_layout(Layout::Nchw)
            .unwrap()
            .into_layout(Layout::Nhwc)
            .unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_channels_first_heuristic() {
        let dims = infer_output_layout(&[1, 3, 64, 32], Layout::Nhwc).unwrap();
        assert_eq!(
            dims,
            OutputDims {
                width: 32,
                height: 64,
                channels: 3,
                layout: Layout::Nchw,
            }
        );
    }

    #[test]
    fn test_channels_last_default() {
        let dims = infer_output_layout(&[1, 64, 32, 3], Layout::Nhwc).unwrap();
        assert_eq!(
            dims,
            OutputDims {
                width: 32,
                height: 64,
                channels: 3,
                layout: Layout::Nhwc,
            }
        );
    }

    #[test]
    fn test_requested_nchw_wins_on_small_images() {
        // 4x4 spatial output: heuristic alone would say NHWC.
        let dims = infer_output_layout(&[1, 2, 4, 4], Layout::Nchw).unwrap();
        assert_eq!(dims.layout, Layout::Nchw);
        assert_eq!(dims.channels, 2);

        let dims = infer_output_layout(&[1, 2, 4, 4], Layout::Nhwc).unwrap();
        assert_eq!(dims.layout, Layout::Nhwc);
        assert_eq!(dims.channels, 4);
    }

    #[test]
    fn test_two_and_three_dimensional_shapes() {
        let dims = infer_output_layout(&[10, 20], Layout::Nhwc).unwrap();
        assert_eq!((dims.width, dims.height, dims.channels), (20, 10, 1));

        let dims = infer_output_layout(&[1, 16, 16], Layout::Nhwc).unwrap();
        assert_eq!((dims.width, dims.height, dims.channels), (16, 16, 1));
        assert_eq!(dims.layout, Layout::Nchw);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let cases: [(&[i64], Layout); 5] = [
            (&[2, 3, 8, 8], Layout::Nchw),
            (&[1, 0, 8, 8], Layout::Nchw),
            (&[1, -1, 8, 8], Layout::Nchw),
            (&[8], Layout::Nchw),
            (&[1, 8, 8, 300], Layout::Nhwc),
        ];
        for (shape, requested) in cases {
            let err = infer_output_layout(shape, requested).unwrap_err();
            assert!(matches!(err, Error::ShapeMismatch { .. }), "{shape:?}");
        }
    }
}
