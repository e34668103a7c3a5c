use burn::{
    module::Ignored,
    nn::{BatchNorm, conv::Conv2d},
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

#[cfg(feature = "training")]
use crate::{dataset::SegmentationBatch, training::SegmentationOutput};
#[cfg(feature = "training")]
use burn::{
    tensor::backend::AutodiffBackend,
    train::{TrainOutput, TrainStep, ValidStep},
};

use super::blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock, EncoderBlockConfig,
    StageConfig,
};
use crate::error::{UNetError, UNetResult};
use crate::loss::{JaccardLoss, JaccardLossConfig};

#[derive(Config, Debug)]
pub enum OutputActivation {
    /// Independent per-pixel probabilities, for binary segmentation.
    Sigmoid,
    /// Probabilities normalized over the class channels.
    Softmax,
    /// Raw logits.
    Identity,
}

#[derive(Config, Debug)]
pub struct UNetConfig {
    /// `[height, width]` of the input images. Both must be divisible by `2^num_layers`.
    pub input_size: [usize; 2],
    #[config(default = 1)]
    pub input_channels: usize,
    #[config(default = 4)]
    pub num_layers: usize,
    #[config(default = 16)]
    pub base_filters: usize,
    #[config(default = 1)]
    pub num_classes: usize,
    #[config(default = "OutputActivation::Sigmoid")]
    pub output_activation: OutputActivation,
    #[config(default = "StageConfig::new()")]
    pub stage: StageConfig,
    /// L2 factor applied to the sum of squared convolution kernels during training.
    #[config(default = 0.01)]
    pub kernel_l2: f64,
    #[config(default = "JaccardLossConfig::new()")]
    pub loss: JaccardLossConfig,
}

/// Per-stage shapes of a configuration, as `[channels, height, width]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UNetPlan {
    pub skips: Vec<[usize; 3]>,
    pub bottleneck: [usize; 3],
    pub output: [usize; 3],
}

impl UNetConfig {
    /// Every contracting stage halves the resolution, so inputs must be multiples of this.
    pub fn required_divisor(&self) -> UNetResult<usize> {
        u32::try_from(self.num_layers)
            .ok()
            .and_then(|layers| 1usize.checked_shl(layers))
            .ok_or_else(|| {
                UNetError::InvalidConfig(format!("num_layers {} is too deep", self.num_layers))
            })
    }

    pub fn validate(&self) -> UNetResult<()> {
        for (name, value) in [
            ("num_layers", self.num_layers),
            ("base_filters", self.base_filters),
            ("num_classes", self.num_classes),
            ("input_channels", self.input_channels),
        ] {
            if value == 0 {
                return Err(UNetError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        let divisor = self.required_divisor()?;
        if self.base_filters.checked_mul(divisor).is_none() {
            return Err(UNetError::InvalidConfig(format!(
                "base_filters {} overflows after {} doublings",
                self.base_filters, self.num_layers
            )));
        }

        let [height, width] = self.input_size;
        if height == 0 || width == 0 || height % divisor != 0 || width % divisor != 0 {
            let round_up = |size: usize| size.div_ceil(divisor).max(1) * divisor;
            return Err(UNetError::shape_mismatch(
                "input size (multiple of 2^num_layers)",
                [round_up(height), round_up(width)],
                [height, width],
            ));
        }

        Ok(())
    }

    pub fn plan(&self) -> UNetResult<UNetPlan> {
        self.validate()?;

        let [input_height, input_width] = self.input_size;
        let (mut height, mut width) = (input_height, input_width);
        let mut filters = self.base_filters;
        let mut skips = Vec::with_capacity(self.num_layers);

        for _ in 0..self.num_layers {
            skips.push([filters, height, width]);
            height /= 2;
            width /= 2;
            filters *= 2;
        }

        Ok(UNetPlan {
            skips,
            bottleneck: [filters, height, width],
            output: [self.num_classes, input_height, input_width],
        })
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UNetResult<UNet<B>> {
        let plan = self.plan()?;

        let mut in_channels = self.input_channels;
        let mut encoders = Vec::with_capacity(plan.skips.len());
        for &[filters, _, _] in &plan.skips {
            encoders.push(
                EncoderBlockConfig::new(ConvBlockConfig::new(
                    in_channels,
                    filters,
                    self.stage.clone(),
                ))
                .init(device),
            );
            in_channels = filters;
        }

        let [bottleneck_filters, bottleneck_height, bottleneck_width] = plan.bottleneck;
        let bottleneck =
            ConvBlockConfig::new(in_channels, bottleneck_filters, self.stage.clone()).init(device);

        let mut in_channels = bottleneck_filters;
        let mut decoders = Vec::with_capacity(plan.skips.len());
        for &[filters, _, _] in plan.skips.iter().rev() {
            decoders.push(DecoderBlockConfig::new(in_channels, filters, self.stage.clone()).init(device));
            in_channels = filters;
        }

        let [input_height, input_width] = self.input_size;
        let model = UNet {
            input_norm: self.stage.batch_norm(self.input_channels, device),
            encoders,
            bottleneck,
            decoders,
            head: self
                .stage
                .conv([self.base_filters, self.num_classes], [1, 1], device),
            criterion: self.loss.init(device),
            output_activation: Ignored(self.output_activation.clone()),
            input_channels: self.input_channels,
            input_height,
            input_width,
            num_classes: self.num_classes,
            kernel_l2: self.kernel_l2,
        };

        tracing::debug!(
            "Built U-Net: {} layers, {} base filters, bottleneck {}x{}x{}, {} parameters",
            self.num_layers,
            self.base_filters,
            bottleneck_height,
            bottleneck_width,
            bottleneck_filters,
            model.num_params()
        );

        Ok(model)
    }
}

/// Encoder feature maps in capture order, shallowest first.
#[derive(Debug)]
pub struct SkipConnections<B: Backend> {
    features: Vec<Tensor<B, 4>>,
}

impl<B: Backend> SkipConnections<B> {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor<B, 4>> {
        self.features.iter()
    }

    /// Deepest feature map first, the order in which the expanding path consumes them.
    pub fn into_reversed(self) -> impl Iterator<Item = Tensor<B, 4>> {
        self.features.into_iter().rev()
    }
}

/// Output of the contracting path.
#[derive(Debug)]
pub struct Encoding<B: Backend> {
    pub bottleneck: Tensor<B, 4>,
    pub skips: SkipConnections<B>,
}

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    input_norm: BatchNorm<B, 2>,
    encoders: Vec<EncoderBlock<B>>,
    bottleneck: ConvBlock<B>,
    decoders: Vec<DecoderBlock<B>>,
    head: Conv2d<B>,
    criterion: JaccardLoss<B>,
    output_activation: Ignored<OutputActivation>,

    input_channels: usize,
    input_height: usize,
    input_width: usize,
    num_classes: usize,
    kernel_l2: f64,
}

impl<B: Backend> UNet<B> {
    pub fn num_layers(&self) -> usize {
        self.encoders.len()
    }

    pub fn input_size(&self) -> [usize; 2] {
        [self.input_height, self.input_width]
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn criterion(&self) -> &JaccardLoss<B> {
        &self.criterion
    }

    /// # Panics
    ///
    /// If `images` does not have the configured `[batch, channels, height, width]` layout.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        match self.try_forward(images) {
            Ok(output) => output,
            Err(err) => panic!("U-Net forward pass failed: {err}"),
        }
    }

    pub fn try_forward(&self, images: Tensor<B, 4>) -> UNetResult<Tensor<B, 4>> {
        let encoding = self.encode(images)?;
        self.decode(encoding)
    }

    pub fn encode(&self, images: Tensor<B, 4>) -> UNetResult<Encoding<B>> {
        let dims = images.dims();
        let expected = [
            dims[0],
            self.input_channels,
            self.input_height,
            self.input_width,
        ];
        if dims != expected {
            return Err(UNetError::shape_mismatch("input images", expected, dims));
        }

        let mut x = self.input_norm.forward(images);
        let mut features = Vec::with_capacity(self.encoders.len());
        for encoder in &self.encoders {
            let (pooled, skip_features) = encoder.forward(x);
            features.push(skip_features);
            x = pooled;
        }

        Ok(Encoding {
            bottleneck: self.bottleneck.forward(x),
            skips: SkipConnections { features },
        })
    }

    pub fn decode(&self, encoding: Encoding<B>) -> UNetResult<Tensor<B, 4>> {
        let Encoding { bottleneck, skips } = encoding;
        if skips.len() != self.decoders.len() {
            return Err(UNetError::shape_mismatch(
                "skip connection count",
                [self.decoders.len()],
                [skips.len()],
            ));
        }

        let mut x = bottleneck;
        for (decoder, skip_features) in self.decoders.iter().zip(skips.into_reversed()) {
            x = decoder.forward(x, skip_features)?;
        }

        let x = self.head.forward(x);

        Ok(match &self.output_activation.0 {
            OutputActivation::Sigmoid => sigmoid(x),
            OutputActivation::Softmax => softmax(x, 1),
            OutputActivation::Identity => x,
        })
    }

    /// `kernel_l2` times the sum of every squared convolution kernel weight.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let head = self.head.weight.val().powf_scalar(2.0).sum();

        let total = self
            .encoders
            .iter()
            .map(EncoderBlock::kernel_squared_sum)
            .chain(std::iter::once(self.bottleneck.kernel_squared_sum()))
            .chain(self.decoders.iter().map(DecoderBlock::kernel_squared_sum))
            .fold(head, |acc, squared| acc + squared);

        total * self.kernel_l2
    }

    #[cfg(feature = "training")]
    pub fn forward_segmentation(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        let targets = batch.masks;
        let output = self.forward(batch.images);

        let mut loss = self.criterion.forward(targets.clone(), output.clone());
        if self.kernel_l2 > 0.0 {
            loss = loss + self.l2_penalty();
        }

        SegmentationOutput::new(loss, output, targets)
    }
}

#[cfg(feature = "training")]
impl<B: AutodiffBackend> TrainStep<SegmentationBatch<B>, SegmentationOutput<B>> for UNet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> TrainOutput<SegmentationOutput<B>> {
        let item = self.forward_segmentation(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "training")]
impl<B: Backend> ValidStep<SegmentationBatch<B>, SegmentationOutput<B>> for UNet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        self.forward_segmentation(batch)
    }
}
