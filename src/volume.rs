use std::sync::Arc;

use ndarray::Array3;

/// Per-slice class-index maps for one case.
///
/// `ground_truth` distinguishes annotations loaded from storage from
/// segmentations predicted by the model.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    classes: Arc<Array3<u32>>,
    ground_truth: bool,
}

impl LabelVolume {
    pub fn new(classes: Array3<u32>, ground_truth: bool) -> Self {
        Self {
            classes: Arc::new(classes),
            ground_truth,
        }
    }

    pub(crate) fn from_shared(classes: Arc<Array3<u32>>, ground_truth: bool) -> Self {
        Self { classes, ground_truth }
    }

    /// Class-index map, `[slices, height, width]`.
    #[inline]
    pub fn classes(&self) -> &Array3<u32> {
        &self.classes
    }

    #[inline]
    pub fn is_ground_truth(&self) -> bool {
        self.ground_truth
    }

    #[inline]
    pub(crate) fn shared(&self) -> Arc<Array3<u32>> {
        Arc::clone(&self.classes)
    }
}

/// One subject's image volume plus (optionally) its label volume.
///
/// The image stack is `[slices, height, width]` and is held behind an `Arc`
/// so batch producers can stream slices out of it without copying the whole
/// volume. The label volume is absent after an inference-mode load until the
/// predicted segmentation is attached.
#[derive(Debug, Clone)]
pub struct VolumeCase {
    id: String,
    images: Arc<Array3<f32>>,
    labels: Option<LabelVolume>,
}

impl VolumeCase {
    pub fn new(id: impl Into<String>, images: Array3<f32>) -> Self {
        Self {
            id: id.into(),
            images: Arc::new(images),
            labels: None,
        }
    }

    pub(crate) fn from_shared(id: impl Into<String>, images: Arc<Array3<f32>>) -> Self {
        Self {
            id: id.into(),
            images,
            labels: None,
        }
    }

    /// Attaches ground-truth annotations, consuming and returning the case.
    ///
    /// # Panics
    /// - if the label volume's shape differs from the image volume's
    pub fn with_ground_truth(mut self, labels: Array3<u32>) -> Self {
        assert_eq!(
            labels.shape(),
            self.images.shape(),
            "label volume shape must match image volume shape"
        );
        self.labels = Some(LabelVolume::new(labels, true));
        self
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Image stack, `[slices, height, width]`.
    #[inline]
    pub fn images(&self) -> &Array3<f32> {
        &self.images
    }

    #[inline]
    pub fn labels(&self) -> Option<&LabelVolume> {
        self.labels.as_ref()
    }

    /// Number of 2D slices in the image volume.
    #[inline]
    pub fn slice_count(&self) -> usize {
        self.images.shape()[0]
    }

    #[inline]
    pub(crate) fn set_labels(&mut self, labels: LabelVolume) {
        self.labels = Some(labels);
    }

    /// Attaches a segmentation, replacing any previous label volume.
    ///
    /// Called with `ground_truth == false` when the labels come out of the
    /// model rather than out of storage.
    pub fn add_segmentation(&mut self, labels: Array3<u32>, ground_truth: bool) {
        self.labels = Some(LabelVolume::new(labels, ground_truth));
    }

    #[inline]
    pub(crate) fn images_shared(&self) -> Arc<Array3<f32>> {
        Arc::clone(&self.images)
    }
}
