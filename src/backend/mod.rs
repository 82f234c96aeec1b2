//! Pluggable inference backends.

mod cache;
mod noop;
mod onnx;
mod tfjs;

pub use cache::{ModelCache, SessionCache};
pub use noop::NoopBackend;
pub use onnx::OnnxBackend;
pub use tfjs::{ExecutorOutput, TfjsBackend, TfjsExecutor, TfjsModel, WeightGroup, WeightSpec};

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::tensor::{Layout, Tensor};

/// Contract every inference runtime is wrapped behind.
///
/// Implementations accept NHWC or NCHW input and always return NHWC output.
pub trait InferenceBackend {
    /// Short backend identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// Load (or fetch from cache) the model at `model`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendLoad`] if the runtime or model is unavailable.
    fn load_model(&mut self, model: &Path) -> Result<()>;

    /// Run one inference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inference`] if execution fails or the output shape
    /// cannot be read as an image.
    fn infer(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Release the model handle. Cached sessions stay cached.
    fn dispose(&mut self) {}
}

/// Which backend implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Noop,
    Onnx,
    Tfjs,
}

impl BackendKind {
    /// Pick the backend from an explicit choice or the model file extension.
    ///
    /// No model at all means a pass-through pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendLoad`] if the extension is not recognised.
    pub fn resolve(explicit: Option<Self>, model: Option<&Path>) -> Result<Self> {
        if let Some(kind) = explicit {
            return Ok(kind);
        }
        let Some(model) = model else {
            return Ok(Self::Noop);
        };

        let ext = model
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match ext.as_deref() {
            Some("onnx" | "ort") => Ok(Self::Onnx),
            Some("json") => Ok(Self::Tfjs),
            _ => Err(Error::backend_load(
                "auto",
                format!(
                    "cannot infer backend from model path {}; set inference.backend",
                    model.display()
                ),
            )),
        }
    }

    /// Layout the backend expects when the configuration does not say.
    #[must_use]
    pub fn default_layout(self) -> Layout {
        match self {
            Self::Onnx => Layout::Nchw,
            Self::Noop | Self::Tfjs => Layout::Nhwc,
        }
    }
}

/// Construction parameters shared by all backends.
#[derive(Clone, Default)]
pub struct BackendOptions {
    /// Layout fed to the model; `None` uses [`BackendKind::default_layout`].
    pub layout: Option<Layout>,
    /// Intra-op thread count; `None` lets the runtime decide.
    pub threads: Option<usize>,
    pub cache: SessionCache,
    pub tfjs_executor: Option<Arc<dyn TfjsExecutor>>,
}

/// Construct the backend for `kind`. Dispatch happens once per run.
#[must_use]
pub fn create_backend(kind: BackendKind, opts: BackendOptions) -> Box<dyn InferenceBackend> {
    let layout = opts.layout.unwrap_or_else(|| kind.default_layout());
    match kind {
        BackendKind::Noop => Box::new(NoopBackend),
        BackendKind::Onnx => Box::new(OnnxBackend::new(layout, opts.threads, opts.cache)),
        BackendKind::Tfjs => Box::new(TfjsBackend::new(layout, opts.tfjs_executor, opts.cache)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_extension() {
        let onnx = BackendKind::resolve(None, Some(Path::new("models/seg.ONNX"))).unwrap();
        assert_eq!(onnx, BackendKind::Onnx);
        let tfjs = BackendKind::resolve(None, Some(Path::new("web/model.json"))).unwrap();
        assert_eq!(tfjs, BackendKind::Tfjs);
        assert_eq!(BackendKind::resolve(None, None).unwrap(), BackendKind::Noop);
    }

    #[test]
    fn test_explicit_backend_wins() {
        let kind =
            BackendKind::resolve(Some(BackendKind::Noop), Some(Path::new("m.onnx"))).unwrap();
        assert_eq!(kind, BackendKind::Noop);
    }

    #[test]
    fn test_unknown_extension_fails() {
        let err = BackendKind::resolve(None, Some(Path::new("model.pt"))).unwrap_err();
        assert!(matches!(err, Error::BackendLoad { .. }));
    }

    #[test]
    fn test_create_backend_names() {
        let opts = BackendOptions {
            cache: SessionCache::new(),
            ..BackendOptions::default()
        };
        assert_eq!(create_backend(BackendKind::Noop, opts.clone()).name(), "noop");
        assert_eq!(create_backend(BackendKind::Onnx, opts.clone()).name(), "onnx");
        assert_eq!(create_backend(BackendKind::Tfjs, opts).name(), "tfjs");
    }
}
