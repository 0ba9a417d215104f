use std::{collections::HashMap, sync::Arc};

use ndarray::Array3;

use crate::{
    error::{PipelineError, Result},
    volume::{LabelVolume, VolumeCase},
};

/// Materializes cases from storage.
///
/// Implementations own the on-disk case format; the pipeline only relies on
/// the returned `VolumeCase` carrying an accurate slice count and a label
/// volume iff the load was not in inference mode.
pub trait CaseSource {
    /// Loads one case by id.
    ///
    /// # Args
    /// * `case_id` - Stable identifier of the case.
    /// * `inference_mode` - When true, ground-truth labels are omitted.
    ///
    /// # Errors
    /// Returns `PipelineError::Load` for unknown ids or malformed volumes.
    fn case_loader(&self, case_id: &str, inference_mode: bool) -> Result<VolumeCase>;
}

struct StoredCase {
    images: Arc<Array3<f32>>,
    labels: Arc<Array3<u32>>,
}

/// In-memory case collection.
///
/// Deterministic and test-friendly; volumes are shared out behind `Arc`, so
/// loading a case never copies pixel data.
#[derive(Default)]
pub struct InMemorySource {
    cases: HashMap<String, StoredCase>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a case under `id`.
    ///
    /// # Panics
    /// - if `labels` and `images` differ in shape
    pub fn insert(&mut self, id: impl Into<String>, images: Array3<f32>, labels: Array3<u32>) {
        assert_eq!(
            labels.shape(),
            images.shape(),
            "label volume shape must match image volume shape"
        );
        self.cases.insert(
            id.into(),
            StoredCase {
                images: Arc::new(images),
                labels: Arc::new(labels),
            },
        );
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl CaseSource for InMemorySource {
    fn case_loader(&self, case_id: &str, inference_mode: bool) -> Result<VolumeCase> {
        let stored = self.cases.get(case_id).ok_or_else(|| PipelineError::Load {
            id: case_id.to_string(),
            reason: "unknown case id".to_string(),
        })?;

        let mut case = VolumeCase::from_shared(case_id, Arc::clone(&stored.images));
        if !inference_mode {
            case.set_labels(LabelVolume::from_shared(Arc::clone(&stored.labels), true));
        }
        Ok(case)
    }
}
