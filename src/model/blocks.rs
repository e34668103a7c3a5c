use burn::{
    module::Param,
    nn::{
        BatchNorm, BatchNormConfig, Initializer, LeakyRelu, LeakyReluConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

use crate::error::{UNetError, UNetResult};

/// Settings shared by every convolution stage of the network.
#[derive(Config, Debug)]
pub struct StageConfig {
    #[config(default = 0.01)]
    pub leaky_relu_slope: f64,
    #[config(default = 0.1)]
    pub bias_init: f64,
    #[config(default = 0.01)]
    pub batch_norm_momentum: f64,
    #[config(default = 1e-3)]
    pub batch_norm_epsilon: f64,
}

impl StageConfig {
    /// He normal, as used for every kernel of the network.
    pub fn kernel_initializer(&self) -> Initializer {
        Initializer::KaimingNormal {
            gain: 2f64.sqrt(),
            fan_out_only: false,
        }
    }

    pub fn batch_norm<B: Backend>(&self, channels: usize, device: &B::Device) -> BatchNorm<B, 2> {
        BatchNormConfig::new(channels)
            .with_momentum(self.batch_norm_momentum)
            .with_epsilon(self.batch_norm_epsilon)
            .init(device)
    }

    pub fn conv<B: Backend>(
        &self,
        channels: [usize; 2],
        kernel_size: [usize; 2],
        device: &B::Device,
    ) -> Conv2d<B> {
        let mut conv = Conv2dConfig::new(channels, kernel_size)
            .with_padding(PaddingConfig2d::Same)
            .with_initializer(self.kernel_initializer())
            .init(device);
        conv.bias = Some(self.constant_bias(channels[1], device));
        conv
    }

    /// 3x3 transposed convolution whose output is exactly twice the input size.
    pub fn upsample<B: Backend>(&self, channels: [usize; 2], device: &B::Device) -> ConvTranspose2d<B> {
        let mut conv = ConvTranspose2dConfig::new(channels, [3, 3])
            .with_stride([2, 2])
            .with_padding([1, 1])
            .with_padding_out([1, 1])
            .with_initializer(self.kernel_initializer())
            .init(device);
        conv.bias = Some(self.constant_bias(channels[1], device));
        conv
    }

    fn constant_bias<B: Backend>(&self, channels: usize, device: &B::Device) -> Param<Tensor<B, 1>> {
        Param::from_tensor(Tensor::full([channels], self.bias_init, device))
    }
}

fn squared_sum<B: Backend>(weight: &Param<Tensor<B, 4>>) -> Tensor<B, 1> {
    weight.val().powf_scalar(2.0).sum()
}

/// Two 3x3 convolutions, each followed by a leaky ReLU and a batch norm.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    activation: LeakyRelu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.norm1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);

        self.norm2.forward(x)
    }

    pub fn kernel_squared_sum(&self) -> Tensor<B, 1> {
        squared_sum(&self.conv1.weight) + squared_sum(&self.conv2.weight)
    }
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    input_channels: usize,
    num_filters: usize,
    stage: StageConfig,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        ConvBlock {
            conv1: self
                .stage
                .conv([self.input_channels, self.num_filters], [3, 3], device),
            norm1: self.stage.batch_norm(self.num_filters, device),
            conv2: self
                .stage
                .conv([self.num_filters, self.num_filters], [3, 3], device),
            norm2: self.stage.batch_norm(self.num_filters, device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(self.stage.leaky_relu_slope)
                .init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    conv_block: ConvBlock<B>,
    max_pool: MaxPool2d,
}

impl<B: Backend> EncoderBlock<B> {
    /// Returns the pooled tensor and the pre-pooling features kept for the skip connection.
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let skip_features = self.conv_block.forward(x);
        let x = self.max_pool.forward(skip_features.clone());

        (x, skip_features)
    }

    pub fn kernel_squared_sum(&self) -> Tensor<B, 1> {
        self.conv_block.kernel_squared_sum()
    }
}

#[derive(Config, Debug)]
pub struct EncoderBlockConfig {
    conv_block: ConvBlockConfig,
}

impl EncoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        EncoderBlock {
            conv_block: self.conv_block.init(device),
            max_pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    conv_transpose: ConvTranspose2d<B>,
    conv_block: ConvBlock<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>, skip_features: Tensor<B, 4>) -> UNetResult<Tensor<B, 4>> {
        let x = self.conv_transpose.forward(x);

        let [batch, _, height, width] = x.dims();
        let [skip_batch, _, skip_height, skip_width] = skip_features.dims();
        if [batch, height, width] != [skip_batch, skip_height, skip_width] {
            return Err(UNetError::shape_mismatch(
                "skip connection",
                [batch, height, width],
                [skip_batch, skip_height, skip_width],
            ));
        }

        let x = Tensor::cat(vec![x, skip_features], 1);

        Ok(self.conv_block.forward(x))
    }

    pub fn kernel_squared_sum(&self) -> Tensor<B, 1> {
        squared_sum(&self.conv_transpose.weight) + self.conv_block.kernel_squared_sum()
    }
}

#[derive(Config, Debug)]
pub struct DecoderBlockConfig {
    input_channels: usize,
    num_filters: usize,
    stage: StageConfig,
}

impl DecoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        DecoderBlock {
            conv_transpose: self
                .stage
                .upsample([self.input_channels, self.num_filters], device),
            // Concatenation with the skip doubles the channel count.
            conv_block: ConvBlockConfig::new(
                self.num_filters * 2,
                self.num_filters,
                self.stage.clone(),
            )
            .init(device),
        }
    }
}
