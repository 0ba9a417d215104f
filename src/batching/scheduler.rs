use std::sync::Arc;

use ndarray::Array3;
use tokio::runtime::{Handle, Runtime};

use super::stream::BatchStream;
use crate::{
    config::PipelineConfig,
    error::{PipelineError, Result},
    volume::VolumeCase,
};

/// Computes how many fixed-size batches cover a case and builds the bounded
/// producer streams that feed them to the model.
///
/// Owns the runtime the producer tasks run on, so the rest of the pipeline
/// stays synchronous.
pub struct BatchScheduler {
    image_shape: (usize, usize),
    batch_size: usize,
    queue_size: usize,
    runtime: Runtime,
}

impl BatchScheduler {
    /// Creates a scheduler bound to the pipeline's batching constants.
    ///
    /// # Errors
    /// Returns an error if the backing runtime cannot be created.
    pub fn new(cfg: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            image_shape: cfg.image_shape,
            batch_size: cfg.batch_size.get(),
            queue_size: cfg.max_queue_size.get(),
            runtime: Runtime::new()?,
        })
    }

    /// Plans train-mode batches (images and labels) for `case`.
    ///
    /// # Errors
    /// Returns `PipelineError::Load` if the case carries no label volume or
    /// its slices do not match the configured image shape.
    pub fn plan_train(&self, case: &VolumeCase) -> Result<BatchPlan> {
        self.check_slice_shape(case)?;
        let labels = case.labels().ok_or_else(|| PipelineError::Load {
            id: case.id().to_string(),
            reason: "missing label volume for training".to_string(),
        })?;
        Ok(self.plan(case, Some(labels.shared())))
    }

    /// Plans predict-mode batches (images only) for `case`.
    ///
    /// # Errors
    /// Returns `PipelineError::Load` if the case's slices do not match the
    /// configured image shape.
    pub fn plan_predict(&self, case: &VolumeCase) -> Result<BatchPlan> {
        self.check_slice_shape(case)?;
        Ok(self.plan(case, None))
    }

    fn plan(&self, case: &VolumeCase, labels: Option<Arc<Array3<u32>>>) -> BatchPlan {
        BatchPlan {
            steps: case.slice_count().div_ceil(self.batch_size),
            batch_size: self.batch_size,
            queue_size: self.queue_size,
            images: case.images_shared(),
            labels,
            handle: self.runtime.handle().clone(),
        }
    }

    fn check_slice_shape(&self, case: &VolumeCase) -> Result<()> {
        // Zero-slice cases are a no-op downstream; their nominal slice
        // dimensions are irrelevant.
        if case.slice_count() == 0 {
            return Ok(());
        }

        let shape = case.images().shape();
        let (height, width) = self.image_shape;
        if (shape[1], shape[2]) != (height, width) {
            return Err(PipelineError::Load {
                id: case.id().to_string(),
                reason: format!(
                    "slice shape {}x{} does not match configured {height}x{width}",
                    shape[1], shape[2],
                ),
            });
        }
        Ok(())
    }
}

/// The step count and stream factory for one case.
///
/// `stream` may be called repeatedly; each call spawns an independent
/// producer yielding the same `steps` batches in the case's native slice
/// order, which is what makes multi-epoch fitting restartable.
pub struct BatchPlan {
    steps: usize,
    batch_size: usize,
    queue_size: usize,
    images: Arc<Array3<f32>>,
    labels: Option<Arc<Array3<u32>>>,
    handle: Handle,
}

impl BatchPlan {
    /// Number of batches needed to cover the case's slices.
    #[inline]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Spawns a fresh bounded producer and returns its consuming end.
    pub fn stream(&self) -> BatchStream {
        BatchStream::spawn(
            &self.handle,
            Arc::clone(&self.images),
            self.labels.clone(),
            self.steps,
            self.batch_size,
            self.queue_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use ndarray::{concatenate, Array3, Axis};

    use super::super::batch::Batch;
    use super::*;

    fn scheduler(batch_size: usize, height: usize, width: usize) -> BatchScheduler {
        let cfg = PipelineConfig {
            image_shape: (height, width),
            batch_size: NonZeroUsize::new(batch_size).unwrap(),
            max_queue_size: NonZeroUsize::new(4).unwrap(),
            epochs: NonZeroUsize::new(1).unwrap(),
        };
        BatchScheduler::new(&cfg).unwrap()
    }

    fn numbered_case(slices: usize) -> VolumeCase {
        // Slice s is filled with the value s, so ordering is observable.
        let images = Array3::from_shape_fn((slices, 2, 2), |(s, _, _)| s as f32);
        let labels = Array3::from_shape_fn((slices, 2, 2), |(s, _, _)| s as u32);
        VolumeCase::new("case", images).with_ground_truth(labels)
    }

    fn collect(plan: &BatchPlan) -> Vec<Batch> {
        let mut stream = plan.stream();
        let mut batches = Vec::new();
        while let Some(batch) = stream.next_batch() {
            batches.push(batch);
        }
        batches
    }

    #[test]
    fn hundred_slices_in_batches_of_thirty() {
        let sched = scheduler(30, 2, 2);
        let plan = sched.plan_train(&numbered_case(100)).unwrap();
        assert_eq!(plan.steps(), 4);

        let batches = collect(&plan);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![30, 30, 30, 10]);
        assert_eq!(sizes.iter().sum::<usize>(), 100);
    }

    #[test]
    fn exact_multiple_has_no_short_batch() {
        let sched = scheduler(5, 2, 2);
        let plan = sched.plan_predict(&numbered_case(10)).unwrap();
        assert_eq!(plan.steps(), 2);

        let sizes: Vec<usize> = collect(&plan).iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![5, 5]);
    }

    #[test]
    fn batches_preserve_native_slice_order() {
        let sched = scheduler(3, 2, 2);
        let case = numbered_case(8);
        let plan = sched.plan_train(&case).unwrap();

        let batches = collect(&plan);
        let views: Vec<_> = batches.iter().map(|b| b.images().view()).collect();
        let rebuilt = concatenate(Axis(0), &views).unwrap();
        assert_eq!(rebuilt, *case.images());

        for batch in &batches {
            let labels = batch.labels().unwrap();
            assert_eq!(labels.shape(), batch.images().shape());
        }
    }

    #[test]
    fn streams_are_restartable_per_epoch() {
        let sched = scheduler(4, 2, 2);
        let plan = sched.plan_train(&numbered_case(6)).unwrap();

        let first: Vec<usize> = collect(&plan).iter().map(Batch::len).collect();
        let second: Vec<usize> = collect(&plan).iter().map(Batch::len).collect();
        assert_eq!(first, vec![4, 2]);
        assert_eq!(first, second);
    }

    #[test]
    fn zero_slice_case_yields_nothing() {
        let sched = scheduler(30, 2, 2);
        let plan = sched.plan_predict(&numbered_case(0)).unwrap();
        assert_eq!(plan.steps(), 0);
        assert!(plan.stream().next_batch().is_none());
    }

    #[test]
    fn training_without_labels_is_a_load_error() {
        let sched = scheduler(4, 2, 2);
        let case = VolumeCase::new("c1", Array3::zeros((3, 2, 2)));
        assert!(matches!(
            sched.plan_train(&case),
            Err(PipelineError::Load { .. })
        ));
    }

    #[test]
    fn mismatched_slice_shape_is_a_load_error() {
        let sched = scheduler(4, 8, 8);
        let case = VolumeCase::new("c1", Array3::zeros((3, 2, 2)));
        assert!(matches!(
            sched.plan_predict(&case),
            Err(PipelineError::Load { .. })
        ));
    }
}
