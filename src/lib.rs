//! Batching, training, and inference orchestration for a volumetric
//! image-segmentation model over collections of medical-imaging cases.

pub mod assembler;
pub mod batching;
pub mod config;
pub mod error;
pub mod model;
pub mod persistence;
pub mod report;
pub mod runner;
pub mod source;
pub mod volume;

pub use config::{CompileConfig, LossFnConfig, OptimizerConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use model::{PixelSoftmax, SegmentationModel};
pub use persistence::ModelStore;
pub use report::{EvalSink, TsvSink};
pub use runner::ModelRunner;
pub use source::{CaseSource, InMemorySource};
pub use volume::{LabelVolume, VolumeCase};
