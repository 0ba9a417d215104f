use ndarray::{concatenate, Array3, Array4, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{
    optimizer::{build_optimizer, Optimizer},
    SegmentationModel,
};
use crate::{
    batching::{Batch, BatchStream},
    config::{CompileConfig, LossFnConfig},
    error::{PipelineError, Result},
    persistence::{NamedTensor, Persistable, TensorSpec, Topology},
};

pub(crate) const PIXEL_SOFTMAX_KIND: &str = "pixel_softmax";

/// Minimal baseline segmenter: an independent linear softmax over each
/// pixel's intensity.
///
/// Parameters are a flat buffer of `[scale, bias]` per class, so logits for
/// class `c` at a pixel with intensity `x` are `params[2c] * x + params[2c+1]`.
/// Deliberately small: it keeps the rest of the pipeline exercisable
/// without committing to an architecture.
pub struct PixelSoftmax {
    classes: usize,
    image_shape: (usize, usize),
    params: Vec<f32>,
    optimizer: Box<dyn Optimizer>,
    loss: LossFnConfig,
}

impl std::fmt::Debug for PixelSoftmax {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelSoftmax")
            .field("classes", &self.classes)
            .field("image_shape", &self.image_shape)
            .field("params", &self.params)
            .field("loss", &self.loss)
            .finish_non_exhaustive()
    }
}

impl PixelSoftmax {
    /// Creates a baseline model with deterministic, seeded weight init.
    ///
    /// # Panics
    /// - if `classes < 2`
    pub fn new(classes: usize, image_shape: (usize, usize), seed: u64, compile: CompileConfig) -> Self {
        assert!(classes >= 2, "segmentation needs at least two classes");

        let mut rng = StdRng::seed_from_u64(seed);
        let params = (0..classes * 2)
            .map(|_| rng.random_range(-0.05..0.05))
            .collect::<Vec<f32>>();

        Self {
            classes,
            image_shape,
            optimizer: build_optimizer(compile.optimizer, params.len()),
            loss: compile.loss,
            params,
        }
    }

    /// Re-establishes the training configuration, resetting optimizer state.
    pub fn compile(&mut self, compile: CompileConfig) {
        self.optimizer = build_optimizer(compile.optimizer, self.params.len());
        self.loss = compile.loss;
    }

    /// Flat parameter buffer, `[scale, bias]` per class.
    #[inline]
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    #[inline]
    pub fn image_shape(&self) -> (usize, usize) {
        self.image_shape
    }

    /// Per-pixel class probabilities for one batch, `[len, height, width, classes]`.
    fn forward(&self, images: &Array3<f32>) -> Array4<f32> {
        let shape = images.raw_dim();
        let mut probs = Array4::zeros((shape[0], shape[1], shape[2], self.classes));
        let mut logits = vec![0f32; self.classes];

        for ((s, y, x), &v) in images.indexed_iter() {
            let mut max_logit = f32::NEG_INFINITY;
            for (c, logit) in logits.iter_mut().enumerate() {
                *logit = self.params[2 * c] * v + self.params[2 * c + 1];
                max_logit = max_logit.max(*logit);
            }

            let mut denom = 0f32;
            for logit in logits.iter_mut() {
                *logit = (*logit - max_logit).exp();
                denom += *logit;
            }
            for (c, logit) in logits.iter().enumerate() {
                probs[[s, y, x, c]] = logit / denom;
            }
        }

        probs
    }

    fn check_batch(&self, batch: &Batch) -> Result<()> {
        let shape = batch.images().shape();
        let (height, width) = self.image_shape;
        if (shape[1], shape[2]) != (height, width) {
            return Err(PipelineError::ShapeMismatch {
                what: "batch slice",
                got: shape[1] * shape[2],
                expected: height * width,
            });
        }
        Ok(())
    }

    fn check_label(&self, label: usize) -> Result<()> {
        if label >= self.classes {
            return Err(PipelineError::Model(format!(
                "label class {label} out of range for {} classes",
                self.classes
            )));
        }
        Ok(())
    }

    fn pixel_loss(&self, p: f32) -> f64 {
        match self.loss {
            LossFnConfig::CategoricalCrossentropy => -f64::from(p).max(1e-12).ln(),
        }
    }
}

fn next_step(batches: &mut BatchStream, step: usize, steps: usize) -> Result<Batch> {
    batches.next_batch().ok_or_else(|| {
        PipelineError::Model(format!("batch stream exhausted at step {step} of {steps}"))
    })
}

fn train_labels(batch: &Batch) -> Result<&Array3<u32>> {
    batch
        .labels()
        .ok_or_else(|| PipelineError::Model("train batch without labels".to_string()))
}

impl SegmentationModel for PixelSoftmax {
    fn classes(&self) -> usize {
        self.classes
    }

    fn fit_batches(&mut self, batches: &mut BatchStream, steps: usize) -> Result<()> {
        let mut grad = vec![0f32; self.params.len()];

        for step in 0..steps {
            let batch = next_step(batches, step, steps)?;
            self.check_batch(&batch)?;
            let labels = train_labels(&batch)?;

            let probs = self.forward(batch.images());
            grad.fill(0.);
            let mut pixels = 0usize;

            for ((s, y, x), &v) in batch.images().indexed_iter() {
                let label = labels[[s, y, x]] as usize;
                self.check_label(label)?;

                // Softmax + crossentropy: dL/dlogit_c = p_c - onehot_c.
                for c in 0..self.classes {
                    let target = if c == label { 1. } else { 0. };
                    let g = probs[[s, y, x, c]] - target;
                    grad[2 * c] += g * v;
                    grad[2 * c + 1] += g;
                }
                pixels += 1;
            }

            if pixels > 0 {
                let scale = 1. / pixels as f32;
                for g in grad.iter_mut() {
                    *g *= scale;
                }
                self.optimizer.update_params(&grad, &mut self.params)?;
            }
        }

        Ok(())
    }

    fn predict_batches(&mut self, batches: &mut BatchStream, steps: usize) -> Result<Array4<f32>> {
        let mut parts = Vec::with_capacity(steps);

        for step in 0..steps {
            let batch = next_step(batches, step, steps)?;
            self.check_batch(&batch)?;
            parts.push(self.forward(batch.images()));
        }

        if parts.is_empty() {
            let (height, width) = self.image_shape;
            return Ok(Array4::zeros((0, height, width, self.classes)));
        }

        let views = parts.iter().map(|part| part.view()).collect::<Vec<_>>();
        concatenate(Axis(0), &views)
            .map_err(|e| PipelineError::Model(format!("failed to assemble predictions: {e}")))
    }

    fn evaluate_batches(&mut self, batches: &mut BatchStream, steps: usize) -> Result<(f64, f64)> {
        let mut loss_sum = 0f64;
        let mut correct = 0usize;
        let mut pixels = 0usize;

        for step in 0..steps {
            let batch = next_step(batches, step, steps)?;
            self.check_batch(&batch)?;
            let labels = train_labels(&batch)?;

            let probs = self.forward(batch.images());
            for ((s, y, x), &label) in labels.indexed_iter() {
                let label = label as usize;
                self.check_label(label)?;

                loss_sum += self.pixel_loss(probs[[s, y, x, label]]);

                let mut best = 0usize;
                let mut best_p = probs[[s, y, x, 0]];
                for c in 1..self.classes {
                    let p = probs[[s, y, x, c]];
                    if p > best_p {
                        best = c;
                        best_p = p;
                    }
                }
                if best == label {
                    correct += 1;
                }
                pixels += 1;
            }
        }

        if pixels == 0 {
            return Ok((0., 0.));
        }
        Ok((loss_sum / pixels as f64, correct as f64 / pixels as f64))
    }
}

impl Persistable for PixelSoftmax {
    fn topology(&self) -> Topology {
        Topology {
            kind: PIXEL_SOFTMAX_KIND.to_string(),
            classes: self.classes,
            image_shape: self.image_shape,
            tensors: vec![TensorSpec {
                name: "params".to_string(),
                shape: vec![self.classes, 2],
            }],
        }
    }

    fn tensors(&self) -> Vec<NamedTensor> {
        vec![NamedTensor {
            name: "params".to_string(),
            shape: vec![self.classes, 2],
            data: self.params.clone(),
        }]
    }

    fn from_parts(
        topology: &Topology,
        tensors: Vec<NamedTensor>,
        compile: CompileConfig,
    ) -> Result<Self> {
        if topology.kind != PIXEL_SOFTMAX_KIND {
            return Err(PipelineError::Model(format!(
                "unsupported model kind: {}",
                topology.kind
            )));
        }
        if topology.classes < 2 {
            return Err(PipelineError::Model(format!(
                "invalid class count: {}",
                topology.classes
            )));
        }

        let params = tensors
            .into_iter()
            .find(|t| t.name == "params")
            .ok_or_else(|| PipelineError::Model("missing params tensor".to_string()))?;
        if params.data.len() != topology.classes * 2 {
            return Err(PipelineError::ShapeMismatch {
                what: "params",
                got: params.data.len(),
                expected: topology.classes * 2,
            });
        }

        Ok(Self {
            classes: topology.classes,
            image_shape: topology.image_shape,
            optimizer: build_optimizer(compile.optimizer, params.data.len()),
            loss: compile.loss,
            params: params.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::{batching::BatchScheduler, config::PipelineConfig, volume::VolumeCase};

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            image_shape: (2, 2),
            batch_size: NonZeroUsize::new(2).unwrap(),
            max_queue_size: NonZeroUsize::new(2).unwrap(),
            epochs: NonZeroUsize::new(1).unwrap(),
        }
    }

    fn labeled_case(slices: usize) -> VolumeCase {
        let images = Array3::from_shape_fn((slices, 2, 2), |(s, y, x)| {
            (s + y + x) as f32 / (slices.max(1) + 4) as f32
        });
        let labels = Array3::from_shape_fn((slices, 2, 2), |(_, y, x)| ((y + x) % 2) as u32);
        VolumeCase::new("case", images).with_ground_truth(labels)
    }

    #[test]
    fn probabilities_are_normalized_per_pixel() {
        let mut model = PixelSoftmax::new(3, (2, 2), 7, CompileConfig::default());
        let sched = BatchScheduler::new(&small_config()).unwrap();
        let plan = sched.plan_predict(&labeled_case(5)).unwrap();

        let probs = model.predict_batches(&mut plan.stream(), plan.steps()).unwrap();
        assert_eq!(probs.shape(), &[5, 2, 2, 3]);

        for lane in probs.rows() {
            let sum: f32 = lane.iter().sum();
            assert!((sum - 1.).abs() < 1e-5);
        }
    }

    #[test]
    fn fitting_mutates_the_parameter_buffer() {
        let mut model = PixelSoftmax::new(2, (2, 2), 7, CompileConfig::default());
        let before = model.params().to_vec();

        let sched = BatchScheduler::new(&small_config()).unwrap();
        let plan = sched.plan_train(&labeled_case(4)).unwrap();
        model.fit_batches(&mut plan.stream(), plan.steps()).unwrap();

        assert_ne!(before, model.params());
    }

    #[test]
    fn evaluation_metrics_are_finite() {
        let mut model = PixelSoftmax::new(2, (2, 2), 7, CompileConfig::default());
        let sched = BatchScheduler::new(&small_config()).unwrap();
        let plan = sched.plan_train(&labeled_case(4)).unwrap();

        let (loss, accuracy) = model
            .evaluate_batches(&mut plan.stream(), plan.steps())
            .unwrap();
        assert!(loss.is_finite());
        assert!((0. ..=1.).contains(&accuracy));
    }
}
