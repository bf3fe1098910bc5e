use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::error::{Result, VggError};

use super::ParamLayout;

/// Configuration of a single convolution sub-block: 3x3 conv, batch norm, ReLU.
#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
}

/// One convolution, normalization and rectification triple.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        let conv = Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        ConvBlock {
            conv,
            norm: BatchNormConfig::new(self.out_channels).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> ConvBlock<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, in_channels, height, width]`
    /// - output: `[batch_size, out_channels, height, width]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        self.activation.forward(x)
    }

    pub fn out_channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    fn collect_layout(&self, prefix: &str, layout: &mut ParamLayout) {
        layout.push((format!("{prefix}.conv.weight"), self.conv.weight.dims().to_vec()));
        if let Some(bias) = &self.conv.bias {
            layout.push((format!("{prefix}.conv.bias"), bias.dims().to_vec()));
        }
        layout.push((format!("{prefix}.norm.gamma"), self.norm.gamma.dims().to_vec()));
        layout.push((format!("{prefix}.norm.beta"), self.norm.beta.dims().to_vec()));
        layout.push((
            format!("{prefix}.norm.running_mean"),
            self.norm.running_mean.value().dims().to_vec(),
        ));
        layout.push((
            format!("{prefix}.norm.running_var"),
            self.norm.running_var.value().dims().to_vec(),
        ));
    }
}

/// Configuration of a stage: `num_blocks` sub-blocks followed by a 2x2 max pool.
#[derive(Config, Debug)]
pub struct StageConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub num_blocks: usize,
}

/// A group of convolution sub-blocks followed by one 2x spatial down-sampling.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
}

impl StageConfig {
    /// Builds the stage. The first sub-block maps `in_channels -> out_channels`,
    /// every following one keeps `out_channels`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Stage<B>> {
        if self.num_blocks == 0 {
            return Err(VggError::InvalidStageDepth { stage: 0 });
        }

        let blocks = (0..self.num_blocks)
            .map(|i| {
                let in_channels = if i == 0 {
                    self.in_channels
                } else {
                    self.out_channels
                };
                ConvBlockConfig::new(in_channels, self.out_channels).init(device)
            })
            .collect();

        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Ok(Stage { blocks, pool })
    }
}

impl<B: Backend> Stage<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, in_channels, height, width]`
    /// - output: `[batch_size, out_channels, height / 2, width / 2]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));

        self.pool.forward(x)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn out_channels(&self) -> usize {
        self.blocks.last().map_or(0, ConvBlock::out_channels)
    }

    pub(crate) fn collect_layout(&self, prefix: &str, layout: &mut ParamLayout) {
        for (i, block) in self.blocks.iter().enumerate() {
            block.collect_layout(&format!("{prefix}.blocks.{i}"), layout);
        }
    }
}
