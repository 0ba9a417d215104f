use std::num::NonZeroUsize;

use log::{debug, info};

use crate::{
    assembler,
    batching::BatchScheduler,
    config::PipelineConfig,
    error::Result,
    model::SegmentationModel,
    report::EvalSink,
    source::CaseSource,
    volume::VolumeCase,
};

/// Drives a segmentation model over lists of cases.
///
/// Cases are processed strictly sequentially: the model's weight state is
/// the one shared mutable resource in the pipeline, and weight updates are
/// cumulative across cases and across calls, so parallelizing the outer
/// case loop would race on them. Within one case, batch production runs
/// ahead of the model only up to the configured queue bound.
///
/// An error on one case aborts the remaining ids of the current call; the
/// effects of already-processed ids (weight updates, collected results) are
/// retained.
pub struct ModelRunner<M> {
    model: M,
    scheduler: BatchScheduler,
    epochs: NonZeroUsize,
}

impl<M: SegmentationModel> ModelRunner<M> {
    /// Creates a runner around `model` with the pipeline's fixed bounds.
    ///
    /// # Errors
    /// Returns an error if the batch scheduler cannot be created.
    pub fn new(model: M, cfg: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            model,
            scheduler: BatchScheduler::new(cfg)?,
            epochs: cfg.epochs,
        })
    }

    #[inline]
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Fits the model on each listed case, one epoch pass at a time.
    ///
    /// Zero-slice cases contribute zero steps and are skipped as a no-op.
    ///
    /// # Errors
    /// Returns the first load or model error; remaining ids are not
    /// processed.
    pub fn train<S: CaseSource>(&mut self, ids: &[&str], source: &S) -> Result<()> {
        for id in ids {
            let case = source.case_loader(id, false)?;
            let plan = self.scheduler.plan_train(&case)?;
            info!(
                "training case: id={id} slices={} steps={}",
                case.slice_count(),
                plan.steps()
            );

            for epoch in 0..self.epochs.get() {
                debug!("fit pass: id={id} epoch={epoch}");
                self.model.fit_batches(&mut plan.stream(), plan.steps())?;
            }
        }
        Ok(())
    }

    /// Predicts a segmentation for each listed case.
    ///
    /// Cases are loaded in inference mode, class probabilities are reduced
    /// to discrete labels, and the annotated cases are returned in id-list
    /// order once all ids have been processed.
    ///
    /// # Errors
    /// Returns the first load or model error; results for prior ids are
    /// dropped with the error.
    pub fn predict<S: CaseSource>(&mut self, ids: &[&str], source: &S) -> Result<Vec<VolumeCase>> {
        let mut results = Vec::with_capacity(ids.len());

        for id in ids {
            let mut case = source.case_loader(id, true)?;
            let plan = self.scheduler.plan_predict(&case)?;
            info!(
                "predicting case: id={id} slices={} steps={}",
                case.slice_count(),
                plan.steps()
            );

            let probs = self.model.predict_batches(&mut plan.stream(), plan.steps())?;
            assembler::attach_segmentation(&mut case, &probs)?;
            results.push(case);
        }

        Ok(results)
    }

    /// Scores the model on each listed case and reports `(id, loss, accuracy)`
    /// rows to `sink` in id-list order.
    ///
    /// # Errors
    /// Returns the first load, model, or sink error; remaining ids are not
    /// processed.
    pub fn evaluate<S: CaseSource, K: EvalSink>(
        &mut self,
        ids: &[&str],
        source: &S,
        sink: &mut K,
    ) -> Result<()> {
        for id in ids {
            let case = source.case_loader(id, false)?;
            let plan = self.scheduler.plan_train(&case)?;
            debug!(
                "evaluating case: id={id} slices={} steps={}",
                case.slice_count(),
                plan.steps()
            );

            let (loss, accuracy) = self
                .model
                .evaluate_batches(&mut plan.stream(), plan.steps())?;
            sink.report(id, loss, accuracy)?;
        }
        Ok(())
    }
}
