//! ONNX Runtime backend.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor as OrtTensor;

use super::{InferenceBackend, SessionCache};
use crate::error::{Error, Result};
use crate::tensor::{infer_output_layout, Layout, Tensor};

const NAME: &str = "onnx";

/// Runs models through an `ort` session shared via the [`SessionCache`].
pub struct OnnxBackend {
    layout: Layout,
    threads: Option<usize>,
    cache: SessionCache,
    session: Option<Arc<Mutex<Session>>>,
}

impl OnnxBackend {
    /// Create a backend feeding `layout` tensors to the model.
    #[must_use]
    pub fn new(layout: Layout, threads: Option<usize>, cache: SessionCache) -> Self {
        Self {
            layout,
            threads,
            cache,
            session: None,
        }
    }

    fn build_session(path: &Path, threads: Option<usize>) -> Result<Session> {
        if !path.is_file() {
            return Err(Error::backend_load(
                NAME,
                format!("model file not found: {}", path.display()),
            ));
        }

        let mut builder = Session::builder().map_err(|e| {
            Error::backend_load(NAME, format!("ONNX Runtime (onnxruntime) is not available: {e}"))
        })?;
        if let Some(threads) = threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| Error::backend_load(NAME, e))?;
        }

        builder.commit_from_file(path).map_err(|e| {
            Error::backend_load(NAME, format!("failed to load {}: {e}", path.display()))
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    // A cached session keeps the thread count of its first load.
    fn load_model(&mut self, model: &Path) -> Result<()> {
        tracing::info!("Loading ONNX model {}", model.display());
        let threads = self.threads;
        let session = self
            .cache
            .onnx
            .get_or_load(model, |path| Self::build_session(path, threads).map(Mutex::new))?;
        self.session = Some(session);
        Ok(())
    }

    #[allow(clippy::similar_names)]
    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::inference(NAME, "no model loaded"))?;

        let input = input.clone().into_layout(self.layout)?;
        let [n, d1, d2, d3] = input.batched_shape();
        let array = Array4::from_shape_vec((n, d1, d2, d3), input.data)
            .map_err(|e| Error::inference(NAME, e))?;
        let value = OrtTensor::from_array(array).map_err(|e| Error::inference(NAME, e))?;

        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![value])
            .map_err(|e| Error::inference(NAME, e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::inference(NAME, e))?;

        let dims =
            infer_output_layout(shape, self.layout).map_err(|e| Error::inference(NAME, e))?;
        tracing::trace!("ONNX output shape {shape:?} -> {dims:?}");

        Tensor::new(
            dims.width,
            dims.height,
            dims.channels,
            dims.layout,
            data.to_vec(),
        )?
        .into_layout(Layout::Nhwc)
    }

    fn dispose(&mut self) {
        self.session = None;
    }
}
