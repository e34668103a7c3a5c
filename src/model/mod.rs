mod blocks;
mod unet;

pub use blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock, EncoderBlockConfig,
    StageConfig,
};

pub use unet::{Encoding, OutputActivation, SkipConnections, UNet, UNetConfig, UNetPlan};
