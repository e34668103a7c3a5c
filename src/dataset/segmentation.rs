use burn::{data::dataloader::batcher::Batcher, prelude::*};
use derive_new::new;

#[derive(Config, Debug)]
pub struct SegmentationConfig {
    /// `[height, width]` every item is expected to have.
    pub image_size: [usize; 2],
    #[config(default = 1)]
    pub input_channels: usize,
    #[config(default = 1)]
    pub num_classes: usize,
}

/// One image/mask pair, both stored row-major as `height x width x channels`.
#[derive(new, Clone, Debug)]
pub struct SegmentationItem {
    pub image: Vec<f32>,
    pub mask: Vec<f32>,
}

#[derive(Clone)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
    config: SegmentationConfig,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device, config: SegmentationConfig) -> Self {
        Self { device, config }
    }

    fn channels_first(&self, mut values: Vec<f32>, channels: usize, kind: &str) -> Tensor<B, 3> {
        let [height, width] = self.config.image_size;
        let expected = height * width * channels;

        if values.len() != expected {
            tracing::warn!(
                "Resizing {kind} buffer from {} to {expected} values",
                values.len()
            );
            values.resize(expected, 0.0);
        }

        Tensor::<B, 3>::from_data(
            TensorData::new(values, Shape::new([height, width, channels]))
                .convert::<B::FloatElem>(),
            &self.device,
        )
        .permute([2, 0, 1])
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch_size, input_channels, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size, num_classes, height, width]`, values in `[0, 1]`
    pub masks: Tensor<B, 4>,
}

impl<B: Backend> Batcher<SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    /// # Panics
    ///
    /// If `items` is empty; the data loader never produces empty batches.
    fn batch(&self, items: Vec<SegmentationItem>) -> SegmentationBatch<B> {
        let (images, masks): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| {
                let image = self.channels_first(item.image, self.config.input_channels, "image");
                let mask = self
                    .channels_first(item.mask, self.config.num_classes, "mask")
                    .clamp(0.0, 1.0);
                (image, mask)
            })
            .unzip();

        SegmentationBatch {
            images: Tensor::stack::<4>(images, 0),
            masks: Tensor::stack::<4>(masks, 0),
        }
    }
}
