//! Identity backend for pass-through pipelines and tests.

use std::path::Path;

use super::InferenceBackend;
use crate::error::Result;
use crate::tensor::{Layout, Tensor};

/// Most channels a pass-through result may carry.
const MAX_CHANNELS: u8 = 4;

/// Returns its input unchanged, keeping at most four channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl InferenceBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn load_model(&mut self, _model: &Path) -> Result<()> {
        Ok(())
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        let tensor = input.clone().into_layout(Layout::Nhwc)?;
        if tensor.channels <= MAX_CHANNELS {
            return Ok(tensor);
        }

        let c = usize::from(tensor.channels);
        let keep = usize::from(MAX_CHANNELS);
        let data = tensor
            .data
            .chunks_exact(c)
            .flat_map(|px| px[..keep].iter().copied())
            .collect();
        Tensor::new(tensor.width, tensor.height, MAX_CHANNELS, Layout::Nhwc, data)
    }
}
