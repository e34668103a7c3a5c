use std::marker::PhantomData;

use burn::prelude::*;
use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use derive_new::new;

use crate::metric::{IOU_THRESHOLD, METRIC_SMOOTH, iou};

/// Thresholded IoU of the model output, reported in percent.
pub struct IoUMetric<B: Backend> {
    state: NumericMetricState,
    smooth: f32,
    threshold: f32,
    _b: PhantomData<B>,
}

#[derive(new)]
pub struct IoUInput<B: Backend> {
    pub outputs: Tensor<B, 4>,
    pub targets: Tensor<B, 4>,
}

impl<B: Backend> Default for IoUMetric<B> {
    fn default() -> Self {
        Self {
            state: NumericMetricState::default(),
            smooth: METRIC_SMOOTH,
            threshold: IOU_THRESHOLD,
            _b: PhantomData,
        }
    }
}

impl<B: Backend> IoUMetric<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_smooth(mut self, smooth: f32) -> Self {
        self.smooth = smooth;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

impl<B: Backend> Metric for IoUMetric<B> {
    type Input = IoUInput<B>;
    const NAME: &'static str = "IoU";

    fn update(&mut self, input: &IoUInput<B>, _metadata: &MetricMetadata) -> MetricEntry {
        let [batch_size, ..] = input.outputs.dims();

        let value = iou(
            input.targets.clone(),
            input.outputs.clone(),
            self.smooth,
            self.threshold,
        )
        .into_scalar()
        .elem::<f64>();

        self.state.update(
            100.0 * value,
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend> Numeric for IoUMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}
