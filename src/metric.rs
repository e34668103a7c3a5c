use burn::prelude::*;

use crate::loss::{assert_same_dims, overlap};

/// Predictions above this are counted as foreground.
pub const IOU_THRESHOLD: f32 = 0.5;
/// Smoothing used by the monitoring metric, deliberately weaker than the loss's.
pub const METRIC_SMOOTH: f32 = 1.0;

/// Intersection over union of binarized predictions, averaged over the batch.
///
/// Evaluated on detached tensors: it is a monitoring value, never a training signal.
pub fn iou<B: Backend>(
    targets: Tensor<B, 4>,
    predictions: Tensor<B, 4>,
    smooth: f32,
    threshold: f32,
) -> Tensor<B, 1> {
    assert_same_dims(&targets, &predictions);

    let predictions = predictions.detach().greater_elem(threshold).float();
    let (intersection, union) = overlap(targets.detach(), predictions);

    ((intersection + smooth) / (union + smooth)).mean()
}
