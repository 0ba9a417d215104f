use ndarray::{Array3, Array4};

use crate::{
    error::{PipelineError, Result},
    volume::VolumeCase,
};

/// Reduces per-slice class probabilities to discrete labels and attaches
/// them to the originating case as a predicted segmentation.
///
/// `probs` is `[slices, height, width, classes]` in the case's native slice
/// order; the image volume is left untouched and the attached label volume
/// is flagged as not-ground-truth.
///
/// # Errors
/// Returns `PipelineError::ShapeMismatch` if `probs` disagrees with the
/// case's slice count or slice dimensions.
pub fn attach_segmentation(case: &mut VolumeCase, probs: &Array4<f32>) -> Result<()> {
    let shape = probs.shape();
    if shape[0] != case.slice_count() {
        return Err(PipelineError::ShapeMismatch {
            what: "prediction slices",
            got: shape[0],
            expected: case.slice_count(),
        });
    }
    if shape[0] > 0 {
        let images = case.images().shape();
        if (shape[1], shape[2]) != (images[1], images[2]) {
            return Err(PipelineError::ShapeMismatch {
                what: "prediction slice dims",
                got: shape[1] * shape[2],
                expected: images[1] * images[2],
            });
        }
    }

    case.add_segmentation(argmax_labels(probs), false);
    Ok(())
}

/// Arg-max over the class axis, per pixel independently.
///
/// Ties keep the lowest class index.
pub fn argmax_labels(probs: &Array4<f32>) -> Array3<u32> {
    let shape = probs.raw_dim();
    let classes = shape[3];

    Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(s, y, x)| {
        let mut best = 0usize;
        let mut best_p = probs[[s, y, x, 0]];
        for c in 1..classes {
            let p = probs[[s, y, x, c]];
            if p > best_p {
                best = c;
                best_p = p;
            }
        }
        best as u32
    })
}
