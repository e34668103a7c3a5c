use std::marker::PhantomData;

use burn::prelude::*;

/// Smoothing used by the training objective.
pub const LOSS_SMOOTH: f32 = 100.0;

#[derive(Config, Debug)]
pub struct JaccardLossConfig {
    /// Added to both sides of the overlap ratio, keeps empty masks defined.
    #[config(default = "LOSS_SMOOTH")]
    pub smooth: f32,
}

impl JaccardLossConfig {
    pub fn init<B: Backend>(&self, _device: &B::Device) -> JaccardLoss<B> {
        self.assertions();
        JaccardLoss {
            smooth: self.smooth,
            _b: PhantomData,
        }
    }

    fn assertions(&self) {
        assert!(
            self.smooth >= 0.,
            "Smoothing factor must be non-negative. Got {}",
            self.smooth
        );
    }
}

/// Jaccard distance `1 - (|t·p| + smooth) / (|t| + |p| - |t·p| + smooth)`, per sample.
#[derive(Module, Debug)]
pub struct JaccardLoss<B: Backend> {
    pub smooth: f32,
    _b: PhantomData<B>,
}

impl<B: Backend> JaccardLoss<B> {
    /// Mean distance over the batch.
    ///
    /// # Shapes
    ///
    /// - targets: `[batch_size, num_classes, height, width]`, values in `[0, 1]`
    /// - predictions: same as targets
    pub fn forward(&self, targets: Tensor<B, 4>, predictions: Tensor<B, 4>) -> Tensor<B, 1> {
        self.forward_no_reduction(targets, predictions).mean()
    }

    /// One distance per sample, shape `[batch_size]`.
    pub fn forward_no_reduction(
        &self,
        targets: Tensor<B, 4>,
        predictions: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        assert_same_dims(&targets, &predictions);

        let (intersection, union) = overlap(targets, predictions);
        let ratio = (intersection + self.smooth) / (union + self.smooth);

        ratio.neg() + 1.0
    }
}

pub fn jaccard_distance<B: Backend>(
    targets: Tensor<B, 4>,
    predictions: Tensor<B, 4>,
    smooth: f32,
) -> Tensor<B, 1> {
    JaccardLossConfig::new()
        .with_smooth(smooth)
        .init(&targets.device())
        .forward(targets, predictions)
}

/// Per-sample intersection and union, summed over channels and pixels.
pub(crate) fn overlap<B: Backend>(
    targets: Tensor<B, 4>,
    predictions: Tensor<B, 4>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [batch_size, ..] = targets.dims();
    let targets = targets.flatten::<2>(1, 3);
    let predictions = predictions.flatten::<2>(1, 3);

    let intersection = (targets.clone() * predictions.clone())
        .sum_dim(1)
        .reshape([batch_size]);
    let union = targets.sum_dim(1).reshape([batch_size])
        + predictions.sum_dim(1).reshape([batch_size])
        - intersection.clone();

    (intersection, union)
}

pub(crate) fn assert_same_dims<B: Backend>(targets: &Tensor<B, 4>, predictions: &Tensor<B, 4>) {
    assert_eq!(
        targets.dims(),
        predictions.dims(),
        "Shape mismatch: targets {:?} vs predictions {:?}",
        targets.dims(),
        predictions.dims()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;

    fn diagonal(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        Tensor::from_floats([[[[1.0, 0.0], [0.0, 1.0]]]], device)
    }

    #[test]
    fn default_smooth_is_the_training_constant() {
        assert_eq!(JaccardLossConfig::new().smooth, LOSS_SMOOTH);
    }

    #[test]
    fn diagonal_scenario_has_zero_distance() {
        let device = Default::default();

        let (intersection, union) = overlap(diagonal(&device), diagonal(&device));
        assert_eq!(intersection.into_scalar().elem::<f32>(), 2.0);
        assert_eq!(union.into_scalar().elem::<f32>(), 2.0);

        let distance = jaccard_distance(diagonal(&device), diagonal(&device), 1.0);
        assert_eq!(distance.into_scalar().elem::<f32>(), 0.0);
    }

    #[test]
    fn perfect_overlap_is_zero_for_any_smooth() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 4>::from_floats(
            [
                [[[0.0, 1.0, 1.0], [0.0, 1.0, 1.0]]],
                [[[1.0, 1.0, 0.0], [0.0, 0.0, 0.0]]],
            ],
            &device,
        );

        for smooth in [0.5, 1.0, 100.0] {
            let distance = jaccard_distance(mask.clone(), mask.clone(), smooth)
                .into_scalar()
                .elem::<f32>();
            assert!(distance.abs() < 1e-6, "smooth {smooth}: {distance}");
        }
    }

    #[test]
    fn soft_masks_keep_a_small_self_distance() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 4>::from_floats([[[[0.5, 1.0]]]], &device);

        // intersection 1.25, union 1.75: 1 - 2.25 / 2.75
        let distance = jaccard_distance(mask.clone(), mask, 1.0)
            .into_scalar()
            .elem::<f32>();

        assert!((distance - 2.0 / 11.0).abs() < 1e-5, "{distance}");
    }

    #[test]
    fn empty_masks_are_defined_and_zero() {
        let device = Default::default();
        let zeros = Tensor::<TestBackend, 4>::zeros([2, 1, 4, 4], &device);

        let distance = jaccard_distance(zeros.clone(), zeros, 1.0)
            .into_scalar()
            .elem::<f32>();

        assert_eq!(distance, 0.0);
    }

    #[test]
    fn disjoint_masks_approach_one_with_small_smooth() {
        let device = Default::default();
        let targets = diagonal(&device);
        let predictions = targets.clone().neg() + 1.0;

        let distance = jaccard_distance(targets, predictions, 1e-3)
            .into_scalar()
            .elem::<f32>();

        assert!((distance - 1.0).abs() < 1e-3);
    }

    #[test]
    fn no_reduction_keeps_one_value_per_sample() {
        let device = Default::default();
        let targets = Tensor::<TestBackend, 4>::from_floats(
            [[[[1.0, 1.0], [0.0, 0.0]]], [[[1.0, 1.0], [1.0, 1.0]]]],
            &device,
        );
        let predictions = Tensor::<TestBackend, 4>::from_floats(
            [[[[1.0, 1.0], [0.0, 0.0]]], [[[1.0, 0.0], [0.0, 0.0]]]],
            &device,
        );

        let distances = JaccardLossConfig::new()
            .with_smooth(0.0)
            .init(&device)
            .forward_no_reduction(targets, predictions)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(distances.len(), 2);
        assert!(distances[0].abs() < 1e-6);
        assert!((distances[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn loss_is_differentiable() {
        type B = Autodiff<TestBackend>;
        let device = Default::default();
        let targets = Tensor::<B, 4>::from_floats([[[[1.0, 0.0], [0.0, 1.0]]]], &device);
        let predictions =
            Tensor::<B, 4>::from_floats([[[[0.7, 0.2], [0.1, 0.9]]]], &device).require_grad();

        let loss = JaccardLossConfig::new()
            .init(&device)
            .forward(targets, predictions.clone());
        let grads = loss.backward();

        assert!(predictions.grad(&grads).is_some());
    }

    #[test]
    #[should_panic(expected = "Shape mismatch")]
    fn rejects_mismatched_shapes() {
        let device = Default::default();

        jaccard_distance(
            Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device),
            Tensor::<TestBackend, 4>::zeros([1, 1, 2, 3], &device),
            1.0,
        );
    }

    #[test]
    #[should_panic(expected = "Smoothing factor must be non-negative")]
    fn rejects_negative_smooth() {
        JaccardLossConfig::new()
            .with_smooth(-1.0)
            .init::<TestBackend>(&Default::default());
    }
}
