//! TensorFlow.js graph/layers model backend.
//!
//! There is no native TF.js runtime for Rust, so graph execution is delegated
//! to an embedder-supplied [`TfjsExecutor`]. This module owns everything
//! around that call: manifest loading, layout conversion and output shape
//! inference.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::{InferenceBackend, SessionCache};
use crate::error::{Error, Result};
use crate::tensor::{infer_output_layout, Layout, Tensor};

const NAME: &str = "tfjs";

/// One entry of a `weightsManifest` group.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightSpec {
    pub name: String,
    #[serde(default)]
    pub shape: Vec<usize>,
    #[serde(default)]
    pub dtype: Option<String>,
}

/// A group of weight shards listed in `model.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightGroup {
    pub paths: Vec<String>,
    #[serde(default)]
    pub weights: Vec<WeightSpec>,
}

/// Parsed `model.json` of a converted TF.js model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TfjsModel {
    #[serde(default)]
    pub format: Option<String>,
    pub model_topology: serde_json::Value,
    #[serde(default)]
    pub weights_manifest: Vec<WeightGroup>,
    /// Directory containing `model.json`; shard paths are relative to it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl TfjsModel {
    /// Read and validate a `model.json`, checking that all weight shards exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendLoad`] if the manifest is unreadable, malformed
    /// or references missing shards.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::backend_load(NAME, format!("cannot read {}: {e}", path.display()))
        })?;
        let mut model: Self = serde_json::from_str(&text).map_err(|e| {
            Error::backend_load(NAME, format!("invalid model manifest {}: {e}", path.display()))
        })?;
        model.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        if let Some(missing) = model.shard_paths().find(|p| !p.is_file()) {
            return Err(Error::backend_load(
                NAME,
                format!("weight shard not found: {}", missing.display()),
            ));
        }

        Ok(model)
    }

    /// Absolute paths of every weight shard.
    pub fn shard_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.weights_manifest
            .iter()
            .flat_map(|group| group.paths.iter())
            .map(|p| self.base_dir.join(p))
    }
}

/// Output of a [`TfjsExecutor`] call: a row-major shape and its data.
pub type ExecutorOutput = (Vec<i64>, Vec<f32>);

/// Executes a loaded TF.js model on one batched input.
pub trait TfjsExecutor: Send + Sync {
    /// Run `model` on `data` laid out as `shape` (batch axis first).
    ///
    /// # Errors
    ///
    /// Implementations return an error when execution fails.
    fn execute(&self, model: &TfjsModel, shape: &[usize], data: &[f32]) -> Result<ExecutorOutput>;
}

/// TF.js backend; needs a [`TfjsExecutor`] to run anything.
pub struct TfjsBackend {
    layout: Layout,
    executor: Option<Arc<dyn TfjsExecutor>>,
    cache: SessionCache,
    model: Option<Arc<TfjsModel>>,
}

impl TfjsBackend {
    /// Create a backend that feeds `layout` tensors to `executor`.
    #[must_use]
    pub fn new(
        layout: Layout,
        executor: Option<Arc<dyn TfjsExecutor>>,
        cache: SessionCache,
    ) -> Self {
        Self {
            layout,
            executor,
            cache,
            model: None,
        }
    }
}

impl InferenceBackend for TfjsBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn load_model(&mut self, model: &Path) -> Result<()> {
        if self.executor.is_none() {
            return Err(Error::backend_load(
                NAME,
                "TensorFlow.js runtime is not available: no TfjsExecutor is installed",
            ));
        }

        tracing::info!("Loading TF.js model {}", model.display());
        let loaded = self.cache.tfjs.get_or_load(model, TfjsModel::from_file)?;
        tracing::debug!(
            "TF.js model format {:?} with {} weight groups",
            loaded.format,
            loaded.weights_manifest.len()
        );
        self.model = Some(loaded);
        Ok(())
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        let (Some(executor), Some(model)) = (&self.executor, &self.model) else {
            return Err(Error::inference(NAME, "no model loaded"));
        };

        let input = input.clone().into_layout(self.layout)?;
        let (shape, data) = executor.execute(model, &input.batched_shape(), &input.data)?;

        let dims =
            infer_output_layout(&shape, self.layout).map_err(|e| Error::inference(NAME, e))?;
        Tensor::new(dims.width, dims.height, dims.channels, dims.layout, data)
            .map_err(|e| Error::inference(NAME, e))?
            .into_layout(Layout::Nhwc)
    }

    fn dispose(&mut self) {
        self.model = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes its input, or emits a fixed 5-class NCHW score map.
    struct EchoExecutor {
        classes: Option<usize>,
    }

    impl TfjsExecutor for EchoExecutor {
        fn execute(
            &self,
            _model: &TfjsModel,
            shape: &[usize],
            data: &[f32],
        ) -> Result<ExecutorOutput> {
            let to_i64 = |d: usize| i64::try_from(d).unwrap();
            match self.classes {
                None => Ok((shape.iter().copied().map(to_i64).collect(), data.to_vec())),
                Some(k) => {
                    // shape is [1, h, w, c] because the backend feeds NHWC
                    let (h, w) = (shape[1], shape[2]);
                    #[allow(clippy::cast_precision_loss)]
                    let out = (0..k * h * w).map(|i| (i / (h * w)) as f32).collect();
                    Ok((vec![1, to_i64(k), to_i64(h), to_i64(w)], out))
                }
            }
        }
    }

    /// Returns zeros in a fixed output shape.
    struct FixedShape(Vec<i64>);

    impl TfjsExecutor for FixedShape {
        fn execute(
            &self,
            _model: &TfjsModel,
            _shape: &[usize],
            _data: &[f32],
        ) -> Result<ExecutorOutput> {
            let len = self.0.iter().product::<i64>().max(0);
            Ok((self.0.clone(), vec![0.0; usize::try_from(len).unwrap()]))
        }
    }

    fn write_manifest(dir: &Path, shard: Option<&str>) -> PathBuf {
        let paths = shard.map_or_else(String::new, |s| format!("\"{s}\""));
        let json = format!(
            r#"{{
                "format": "graph-model",
                "modelTopology": {{"node": []}},
                "weightsManifest": [{{
                    "paths": [{paths}],
                    "weights": [{{"name": "w", "shape": [1], "dtype": "float32"}}]
                }}]
            }}"#
        );
        let path = dir.join("model.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_missing_runtime_names_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), None);
        let mut backend = TfjsBackend::new(Layout::Nhwc, None, SessionCache::new());

        let err = backend.load_model(&path).unwrap_err();
        let Error::BackendLoad { backend, message } = err else {
            panic!("expected BackendLoad");
        };
        assert_eq!(backend, "tfjs");
        assert!(message.contains("TensorFlow.js runtime"));
    }

    #[test]
    fn test_missing_shard_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), Some("group1-shard1of1.bin"));
        let executor: Arc<dyn TfjsExecutor> = Arc::new(EchoExecutor { classes: None });
        let mut backend = TfjsBackend::new(Layout::Nhwc, Some(executor), SessionCache::new());

        let err = backend.load_model(&path).unwrap_err();
        assert!(err.to_string().contains("weight shard not found"));
    }

    #[test]
    fn test_echo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("w.bin"), [0u8; 4]).unwrap();
        let path = write_manifest(dir.path(), Some("w.bin"));
        let executor: Arc<dyn TfjsExecutor> = Arc::new(EchoExecutor { classes: None });
        let mut backend = TfjsBackend::new(Layout::Nhwc, Some(executor), SessionCache::new());
        backend.load_model(&path).unwrap();

        #[allow(clippy::cast_precision_loss)]
        let data = (0..8 * 6 * 3).map(|i| i as f32).collect();
        let input = Tensor::new(8, 6, 3, Layout::Nhwc, data).unwrap();
        assert_eq!(backend.infer(&input).unwrap(), input);
    }

    #[test]
    fn test_channels_first_output_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), None);
        let executor: Arc<dyn TfjsExecutor> = Arc::new(EchoExecutor { classes: Some(3) });
        let mut backend = TfjsBackend::new(Layout::Nhwc, Some(executor), SessionCache::new());
        backend.load_model(&path).unwrap();

        let out = backend.infer(&Tensor::zeros(8, 6, 3, Layout::Nhwc)).unwrap();
        assert_eq!((out.width, out.height, out.channels), (8, 6, 3));
        assert_eq!(out.layout, Layout::Nhwc);
        // every pixel carries [0, 1, 2] after the transpose
        assert_eq!(&out.data[..6], &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_unreadable_output_shape_is_inference_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), None);
        let input = Tensor::zeros(8, 8, 3, Layout::Nhwc);

        for shape in [vec![2, 3, 8, 8], vec![8], vec![1, 0, 8, 8]] {
            let executor: Arc<dyn TfjsExecutor> = Arc::new(FixedShape(shape));
            let mut backend = TfjsBackend::new(Layout::Nhwc, Some(executor), SessionCache::new());
            backend.load_model(&path).unwrap();

            let err = backend.infer(&input).unwrap_err();
            let Error::Inference { backend, .. } = err else {
                panic!("expected Inference");
            };
            assert_eq!(backend, "tfjs");
        }
    }

    #[test]
    fn test_models_are_cached_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), None);
        let cache = SessionCache::new();
        let executor: Arc<dyn TfjsExecutor> = Arc::new(EchoExecutor { classes: None });

        for _ in 0..2 {
            let executor = Some(Arc::clone(&executor));
            let mut backend = TfjsBackend::new(Layout::Nhwc, executor, cache.clone());
            backend.load_model(&path).unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
