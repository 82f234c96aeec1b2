//! Image -> tensor -> backend -> image pipeline.

mod config;

pub use config::{
    AutoKeyword, Concurrency, CropConfig, InferenceConfig, OutputConfig, PipelineConfig,
    PreprocessConfig, TensorFormat,
};

use std::path::{Path, PathBuf};

use crate::backend::{create_backend, BackendKind, BackendOptions, InferenceBackend, SessionCache};
use crate::error::{Error, Result, StageContext};
use crate::image::{self, RasterBuffer};
use crate::postprocess::apply_chain;
use crate::raw::save_raw;
use crate::tensor::{from_tensor, to_tensor, Layout, Tensor};
use crate::tiling::{run_tiled, TileParams};

/// Summary of one processed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Whether inference ran tile by tile.
    pub tiled: bool,
    pub raw_path: Option<PathBuf>,
}

/// A configured pipeline bound to one backend instance.
pub struct Pipeline {
    config: PipelineConfig,
    kind: BackendKind,
    backend: Box<dyn InferenceBackend>,
    model_loaded: bool,
}

impl Pipeline {
    /// Create a pipeline using the process-wide session cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no backend fits the model.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_options(
            config,
            BackendOptions {
                cache: SessionCache::global(),
                ..BackendOptions::default()
            },
        )
    }

    /// Create a pipeline with explicit backend options.
    ///
    /// Layout and thread count from `config` fill in whatever `opts` leaves unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no backend fits the model.
    pub fn with_options(config: PipelineConfig, opts: BackendOptions) -> Result<Self> {
        config.validate()?;

        let kind =
            BackendKind::resolve(config.inference.backend, config.inference.model.as_deref())?;
        let opts = fill_options(&config, opts);

        tracing::info!("Initializing pipeline with {kind:?} backend");
        tracing::debug!("Pipeline config: {config:?}");

        let backend = create_backend(kind, opts);
        Ok(Self {
            config,
            kind,
            backend,
            model_loaded: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// Run the full stage sequence on one image.
    ///
    /// # Arguments
    ///
    /// * `input_path` - Image to read
    /// * `output_path` - Where to write the processed image
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stage`] wrapping the first failure.
    pub fn process<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        input_path: P,
        output_path: Q,
    ) -> Result<ProcessResult> {
        let input_path = input_path.as_ref();
        let output_path = output_path.as_ref();

        tracing::info!("Concurrency: {:?}", self.config.concurrency);
        tracing::info!("Processing image: {}", input_path.display());

        let original = image::load_raster(input_path).stage("load")?;
        let prepared = self.preprocess(&original).stage("preprocess")?;

        self.ensure_model().stage("backend")?;
        if self.config.inference.warmup {
            self.warmup(&prepared);
        }

        let tiled = self.config.inference.tiling.apply;
        let (raster, tensor) = self.infer(&prepared).stage("inference")?;

        tracing::info!("Postprocessing...");
        let processed =
            apply_chain(raster, &self.config.postprocessing, &original).stage("postprocess")?;

        tracing::info!("Saving output to: {}", output_path.display());
        let format = image::output_format(output_path, self.config.output.format.as_deref())
            .stage("save")?;
        image::save_raster(&processed, output_path, format, self.config.output.quality)
            .stage("save")?;

        let raw_path = match &self.config.output.save_raw {
            Some(raw) => {
                save_raw(&tensor, raw, self.config.postprocessing.denormalize_scale())
                    .stage("raw")?;
                Some(raw.path.clone())
            }
            None => None,
        };

        tracing::info!("Processing complete");
        Ok(ProcessResult {
            output_path: output_path.to_path_buf(),
            width: processed.width,
            height: processed.height,
            channels: processed.channels,
            tiled,
            raw_path,
        })
    }

    /// Grayscale, then resize, then center crop.
    fn preprocess(&self, original: &RasterBuffer) -> Result<RasterBuffer> {
        let pre = &self.config.preprocessing;
        let mut raster = if pre.grayscale {
            image::to_grayscale(original)?
        } else {
            original.clone()
        };

        if let Some(resize) = &pre.resize {
            raster = image::resize_raster(&raster, resize)?;
        }
        if let Some(crop) = &pre.center_crop {
            raster = image::center_crop(&raster, crop.width, crop.height);
        }

        tracing::debug!(
            "Preprocessed to {}x{}x{}",
            raster.width,
            raster.height,
            raster.channels
        );
        Ok(raster)
    }

    fn ensure_model(&mut self) -> Result<()> {
        if self.model_loaded {
            return Ok(());
        }
        match (&self.config.inference.model, self.kind) {
            (Some(model), _) => self.backend.load_model(model)?,
            (None, BackendKind::Noop) => {}
            (None, _) => {
                return Err(Error::backend_load(
                    self.backend.name(),
                    "no model configured; set inference.model",
                ))
            }
        }
        self.model_loaded = true;
        Ok(())
    }

    /// One inference on zeros shaped like the first real input. Failures are logged only.
    fn warmup(&mut self, prepared: &RasterBuffer) {
        let (mut w, mut h) = (prepared.width, prepared.height);
        if self.config.inference.tiling.apply {
            let (tw, th) = self.config.inference.tiling.tile_size.dims();
            w = w.min(tw);
            h = h.min(th);
        }

        tracing::info!("Warming up {} backend on {w}x{h}", self.backend.name());
        let zeros = Tensor::zeros(w, h, prepared.channels, Layout::Nhwc);
        if let Err(err) = self.backend.infer(&zeros) {
            tracing::warn!("Warmup inference failed, continuing: {err}");
        }
    }

    /// Returns the output raster and the tensor used for raw dumps.
    fn infer(&mut self, prepared: &RasterBuffer) -> Result<(RasterBuffer, Tensor)> {
        let pre = &self.config.preprocessing;
        let scale = self.config.postprocessing.denormalize_scale();

        if self.config.inference.tiling.apply {
            let params = TileParams {
                tiling: &self.config.inference.tiling,
                normalize: pre.normalize.as_ref(),
                order: pre.format.channel_order,
                dtype: &pre.format.dtype,
                scale,
            };
            let out = run_tiled(prepared, self.backend.as_mut(), &params)?;
            return Ok((out.raster, out.tensor));
        }

        tracing::info!("Running {} inference...", self.backend.name());
        let input = to_tensor(
            prepared,
            pre.normalize.as_ref(),
            pre.format.channel_order,
            &pre.format.dtype,
        )?;
        let output = self.backend.infer(&input)?;
        let raster = from_tensor(&output, scale)?;
        Ok((raster, output))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.backend.dispose();
    }
}

/// Fill unset backend options from the config.
///
/// `concurrency` only reaches the ONNX runtime's intra-op pool: `image` 0.25
/// exposes no thread setting for decoding or resizing.
fn fill_options(config: &PipelineConfig, mut opts: BackendOptions) -> BackendOptions {
    opts.layout = opts.layout.or(config.preprocessing.format.layout);
    opts.threads = opts.threads.or(config.concurrency.threads());
    opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ExecutorOutput, TfjsExecutor, TfjsModel};
    use crate::tiling::TilingConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pattern(w: u32, h: u32) -> RasterBuffer {
        let mut pixels = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                #[allow(clippy::cast_possible_truncation)]
                pixels.extend_from_slice(&[
                    (x * 7 % 256) as u8,
                    (y * 13 % 256) as u8,
                    ((x + y) * 5 % 256) as u8,
                ]);
            }
        }
        RasterBuffer::new(w, h, 3, pixels).unwrap()
    }

    fn write_input(dir: &TempDir, raster: &RasterBuffer) -> PathBuf {
        let path = dir.path().join("input.png");
        image::save_raster(raster, &path, ::image::ImageFormat::Png, 90).unwrap();
        path
    }

    fn pipeline(config: PipelineConfig) -> Pipeline {
        let opts = BackendOptions {
            cache: SessionCache::new(),
            ..BackendOptions::default()
        };
        Pipeline::with_options(config, opts).unwrap()
    }

    #[test]
    fn test_noop_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = pattern(20, 12);
        let input_path = write_input(&dir, &input);
        let output_path = dir.path().join("out").join("result.png");

        let mut p = pipeline(PipelineConfig::default());
        assert_eq!(p.backend_kind(), BackendKind::Noop);
        let result = p.process(&input_path, &output_path).unwrap();

        assert_eq!((result.width, result.height, result.channels), (20, 12, 3));
        assert!(!result.tiled);
        assert_eq!(image::load_raster(&output_path).unwrap(), input);
    }

    #[test]
    fn test_uint8_noop_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = RasterBuffer::new(3, 1, 3, vec![10, 100, 200, 0, 50, 128, 1, 2, 3]).unwrap();
        let input_path = write_input(&dir, &input);
        let output_path = dir.path().join("result.png");

        let mut config = PipelineConfig::default();
        config.preprocessing.format.dtype = "uint8".to_string();
        pipeline(config).process(&input_path, &output_path).unwrap();

        assert_eq!(image::load_raster(&output_path).unwrap(), input);
    }

    #[test]
    fn test_tiled_matches_direct() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = write_input(&dir, &pattern(63, 41));

        let direct_path = dir.path().join("direct.png");
        pipeline(PipelineConfig::default())
            .process(&input_path, &direct_path)
            .unwrap();

        let mut config = PipelineConfig::default();
        config.inference.tiling = TilingConfig::new(16, 17, 5);
        let tiled_path = dir.path().join("tiled.png");
        let result = pipeline(config).process(&input_path, &tiled_path).unwrap();

        assert!(result.tiled);
        assert_eq!(
            image::load_raster(&tiled_path).unwrap(),
            image::load_raster(&direct_path).unwrap()
        );
    }

    #[test]
    fn test_preprocess_and_postprocess_stages() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = write_input(&dir, &pattern(32, 24));
        let output_path = dir.path().join("mapped.png");

        let config = PipelineConfig::from_json(
            r#"{
                "preprocessing": {"grayscale": true, "centerCrop": {"width": 16, "height": 16}},
                "postprocessing": {"colorMap": {"name": "viridis"}, "resizeTo": "input"}
            }"#,
        )
        .unwrap();
        let result = pipeline(config).process(&input_path, &output_path).unwrap();
        assert_eq!((result.width, result.height, result.channels), (32, 24, 3));
    }

    #[test]
    fn test_raw_dump() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = write_input(&dir, &pattern(6, 4));
        let raw_path = dir.path().join("raw.npy");

        let mut config = PipelineConfig::default();
        config.output.save_raw = Some(crate::raw::SaveRawConfig::new(&raw_path));
        let result = pipeline(config)
            .process(&input_path, dir.path().join("out.png"))
            .unwrap();
        assert_eq!(result.raw_path.as_deref(), Some(raw_path.as_path()));

        let npy = npyz::NpyFile::new(std::fs::File::open(&raw_path).unwrap()).unwrap();
        assert_eq!(npy.shape(), &[4, 6, 3]);
        let data: Vec<f32> = npy.into_vec().unwrap();
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_missing_input_names_load_stage() {
        let dir = tempfile::tempdir().unwrap();
        let err = pipeline(PipelineConfig::default())
            .process(dir.path().join("nope.png"), dir.path().join("out.png"))
            .unwrap_err();
        assert!(matches!(err, Error::Stage { stage: "load", .. }));
    }

    #[test]
    fn test_tfjs_without_runtime_fails_in_backend_stage() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = write_input(&dir, &pattern(4, 4));
        let model = dir.path().join("model.json");
        std::fs::write(&model, r#"{"modelTopology": {}, "weightsManifest": []}"#).unwrap();

        let mut config = PipelineConfig::default();
        config.inference.model = Some(model);
        let mut p = pipeline(config);
        assert_eq!(p.backend_kind(), BackendKind::Tfjs);

        let err = p.process(&input_path, dir.path().join("out.png")).unwrap_err();
        let Error::Stage { stage, source } = err else {
            panic!("expected a stage error");
        };
        assert_eq!(stage, "backend");
        assert!(matches!(*source, Error::BackendLoad { .. }));
        assert!(source.to_string().contains("TensorFlow.js runtime is not available"));
    }

    #[test]
    fn test_model_required_for_onnx() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = write_input(&dir, &pattern(4, 4));
        let mut config = PipelineConfig::default();
        config.inference.backend = Some(BackendKind::Onnx);

        let err = pipeline(config)
            .process(&input_path, dir.path().join("out.png"))
            .unwrap_err();
        assert!(matches!(err, Error::Stage { stage: "backend", .. }));
    }

    #[test]
    fn test_concurrency_fills_backend_threads() {
        let mut config = PipelineConfig::default();
        config.concurrency = Concurrency::Threads(3);
        config.preprocessing.format.layout = Some(Layout::Nchw);

        let opts = fill_options(&config, BackendOptions::default());
        assert_eq!(opts.threads, Some(3));
        assert_eq!(opts.layout, Some(Layout::Nchw));

        let explicit = BackendOptions {
            threads: Some(1),
            ..BackendOptions::default()
        };
        assert_eq!(fill_options(&config, explicit).threads, Some(1));
        assert_eq!(
            fill_options(&PipelineConfig::default(), BackendOptions::default()).threads,
            None
        );
    }

    /// Fails every call; warmup must not abort the run.
    struct FailingOnce {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl TfjsExecutor for FailingOnce {
        fn execute(
            &self,
            _model: &TfjsModel,
            shape: &[usize],
            data: &[f32],
        ) -> Result<ExecutorOutput> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                return Err(Error::inference("tfjs", "cold start"));
            }
            let shape = shape.iter().map(|&d| i64::try_from(d).unwrap()).collect();
            Ok((shape, data.to_vec()))
        }
    }

    #[test]
    fn test_warmup_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let input = pattern(8, 8);
        let input_path = write_input(&dir, &input);
        let model = dir.path().join("model.json");
        std::fs::write(&model, r#"{"modelTopology": {}, "weightsManifest": []}"#).unwrap();

        let mut config = PipelineConfig::default();
        config.inference.model = Some(model);
        config.inference.warmup = true;

        let executor = Arc::new(FailingOnce {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let opts = BackendOptions {
            cache: SessionCache::new(),
            tfjs_executor: Some(executor.clone()),
            ..BackendOptions::default()
        };
        let output_path = dir.path().join("out.png");
        Pipeline::with_options(config, opts)
            .unwrap()
            .process(&input_path, &output_path)
            .unwrap();

        assert_eq!(executor.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(image::load_raster(&output_path).unwrap(), input);
    }
}
