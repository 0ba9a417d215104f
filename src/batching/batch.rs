use ndarray::Array3;

/// A bounded-size group of slices submitted to the model in one step.
///
/// Train-mode batches carry label maps; predict-mode batches do not. Every
/// batch holds at most `batch_size` slices, and only the final batch of a
/// case may be short.
#[derive(Debug, Clone)]
pub struct Batch {
    images: Array3<f32>,
    labels: Option<Array3<u32>>,
}

impl Batch {
    pub(crate) fn new(images: Array3<f32>, labels: Option<Array3<u32>>) -> Self {
        if let Some(labels) = &labels {
            debug_assert_eq!(labels.shape(), images.shape());
        }
        Self { images, labels }
    }

    /// Number of slices in this batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Image slices, `[len, height, width]`.
    #[inline]
    pub fn images(&self) -> &Array3<f32> {
        &self.images
    }

    /// Label maps, `[len, height, width]`; present only in train mode.
    #[inline]
    pub fn labels(&self) -> Option<&Array3<u32>> {
        self.labels.as_ref()
    }
}
