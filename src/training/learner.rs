use burn::{
    backend::NdArray,
    prelude::*,
    tensor::Transaction,
    train::metric::{Adaptor, ItemLazy, LossInput},
};
use derive_new::new;

use super::metrics::IoUInput;

#[derive(new)]
pub struct SegmentationOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub output: Tensor<B, 4>,
    pub targets: Tensor<B, 4>,
}

impl<B: Backend> ItemLazy for SegmentationOutput<B> {
    type ItemSync = SegmentationOutput<NdArray>;

    fn sync(self) -> Self::ItemSync {
        let synced: [TensorData; 3] = Transaction::default()
            .register(self.loss)
            .register(self.output)
            .register(self.targets)
            .execute()
            .try_into()
            .expect("loss, output and targets are registered");
        let [loss, output, targets] = synced;

        let device = Default::default();
        SegmentationOutput::new(
            Tensor::from_data(loss, &device),
            Tensor::from_data(output, &device),
            Tensor::from_data(targets, &device),
        )
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for SegmentationOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}

impl<B: Backend> Adaptor<IoUInput<B>> for SegmentationOutput<B> {
    fn adapt(&self) -> IoUInput<B> {
        IoUInput::new(self.output.clone(), self.targets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{UNetConfig, dataset::SegmentationBatch};

    type TestBackend = NdArray;

    #[test]
    fn segmentation_step_produces_loss_and_full_resolution_output() {
        let device = Default::default();
        let model = UNetConfig::new([16, 16])
            .with_num_layers(2)
            .with_base_filters(2)
            .init::<TestBackend>(&device)
            .unwrap();
        let batch = SegmentationBatch {
            images: Tensor::ones([2, 1, 16, 16], &device),
            masks: Tensor::zeros([2, 1, 16, 16], &device),
        };

        let item = model.forward_segmentation(batch).sync();

        assert_eq!(item.output.dims(), [2, 1, 16, 16]);
        assert_eq!(item.loss.dims(), [1]);
        let loss = item.loss.into_scalar().elem::<f32>();
        assert!(loss.is_finite() && loss >= 0.0);
    }

    #[test]
    fn iou_input_carries_outputs_and_targets() {
        let device = Default::default();
        let output = SegmentationOutput::<TestBackend>::new(
            Tensor::zeros([1], &device),
            Tensor::ones([1, 1, 2, 2], &device),
            Tensor::zeros([1, 1, 2, 2], &device),
        );

        let input: IoUInput<TestBackend> = output.adapt();

        assert_eq!(input.outputs.dims(), [1, 1, 2, 2]);
        assert_eq!(input.targets.dims(), [1, 1, 2, 2]);
    }
}
