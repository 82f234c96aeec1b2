//! # rastertensor
//!
//! A configuration-driven pipeline that turns a raster image into a tensor,
//! runs it through a pluggable inference backend, and turns the result back
//! into an image.
//!
//! Stages run in a fixed order: decode, preprocess, tensor build, inference
//! (optionally over overlapping tiles), postprocess, encode. The backend
//! output can also be dumped as a NumPy `.npy` or `.npz` file.
//!
//! ## Example
//!
//! ```no_run
//! use rastertensor::{Pipeline, PipelineConfig};
//!
//! # fn main() -> rastertensor::Result<()> {
//! let config = PipelineConfig::from_file("pipeline.json")?;
//! let mut pipeline = Pipeline::new(config)?;
//!
//! pipeline.process("input.png", "output.png")?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod postprocess;
pub mod raw;
pub mod tensor;
pub mod tiling;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineConfig, ProcessResult};
