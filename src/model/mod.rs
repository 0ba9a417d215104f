mod baseline;
mod optimizer;

pub use baseline::PixelSoftmax;
pub use optimizer::{build_optimizer, Adam, GradientDescent, Optimizer};

use ndarray::Array4;

use crate::{batching::BatchStream, error::Result};

/// A trainable segmentation model.
///
/// This trait is the training/inference policy boundary: the pipeline drives
/// implementations with batch streams and step counts and never looks inside.
/// Weight state lives in the implementation and is mutated in place by
/// `fit_batches`; the model is stateless with respect to which case the
/// batches came from, since per-case progress is the pipeline's concern.
pub trait SegmentationModel {
    /// Number of segmentation classes the model discriminates.
    fn classes(&self) -> usize;

    /// Consumes exactly `steps` train-mode batches, updating weights in place.
    ///
    /// # Errors
    /// Returns an error if a batch lacks labels, shapes disagree with the
    /// model, or the stream ends before `steps` batches were yielded.
    fn fit_batches(&mut self, batches: &mut BatchStream, steps: usize) -> Result<()>;

    /// Consumes exactly `steps` predict-mode batches and returns per-slice
    /// class probabilities, `[slices, height, width, classes]`, in the
    /// order the batches were yielded.
    ///
    /// # Errors
    /// Returns an error on shape disagreements or a short stream.
    fn predict_batches(&mut self, batches: &mut BatchStream, steps: usize) -> Result<Array4<f32>>;

    /// Consumes exactly `steps` train-mode batches and returns
    /// `(loss, accuracy)` aggregated over all of their slices.
    ///
    /// # Errors
    /// Returns an error on shape disagreements or a short stream.
    fn evaluate_batches(&mut self, batches: &mut BatchStream, steps: usize) -> Result<(f64, f64)>;
}
