use burn::prelude::*;

use crate::error::{Result, VggError};

use super::{
    classifier::{ClassifierHead, ClassifierHeadConfig},
    preset::{self, NUM_STAGES},
    stage::{Stage, StageConfig},
    ParamLayout,
};

/// Output channels of the five stages.
pub const STAGE_CHANNELS: [usize; NUM_STAGES] = [64, 128, 256, 512, 512];

/// Spatial reduction factor after all five stages.
pub const DOWNSAMPLE_FACTOR: usize = 1 << NUM_STAGES;

/// Configuration to create a [VGG network](Vgg) using the [init function](VggConfig::init).
#[derive(Config, Debug)]
pub struct VggConfig {
    /// Number of convolution sub-blocks in each of the five stages.
    pub stage_config: Vec<usize>,
    /// Expected input as `[channels, height, width]`.
    #[config(default = "[3, 32, 32]")]
    pub input_shape: [usize; 3],
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Accept height/width that are not multiples of 32, flooring the post-conv size.
    #[config(default = "false")]
    pub allow_truncation: bool,
}

/// VGG-style classifier: five convolution stages and a fully-connected head.
#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    stage1: Stage<B>,
    stage2: Stage<B>,
    stage3: Stage<B>,
    stage4: Stage<B>,
    stage5: Stage<B>,
    classifier: ClassifierHead<B>,
}

impl VggConfig {
    /// Creates the configuration of a named preset ("16-layer" or "19-layer").
    pub fn from_preset(name: &str) -> Result<Self> {
        Ok(Self::new(preset::lookup(name)?.to_vec()))
    }

    /// Preset configuration with a custom input shape and class count.
    pub fn from_default_config(
        name: &str,
        input_shape: [usize; 3],
        num_classes: usize,
    ) -> Result<Self> {
        Ok(Self::from_preset(name)?
            .with_input_shape(input_shape)
            .with_num_classes(num_classes))
    }

    /// Checks the stage config, class count and input shape.
    pub fn validate(&self) -> Result<()> {
        if self.stage_config.len() != NUM_STAGES {
            return Err(VggError::InvalidStageCount {
                expected: NUM_STAGES,
                found: self.stage_config.len(),
            });
        }
        if let Some(i) = self.stage_config.iter().position(|n| *n == 0) {
            return Err(VggError::InvalidStageDepth { stage: i + 1 });
        }
        if self.num_classes == 0 {
            return Err(VggError::InvalidClassCount);
        }

        let [channels, height, width] = self.input_shape;
        if channels == 0 {
            return Err(VggError::InvalidInputShape {
                shape: self.input_shape,
                reason: "channel count must be positive".to_string(),
            });
        }
        if height < DOWNSAMPLE_FACTOR || width < DOWNSAMPLE_FACTOR {
            return Err(VggError::InvalidInputShape {
                shape: self.input_shape,
                reason: format!("height and width must be at least {DOWNSAMPLE_FACTOR}"),
            });
        }
        if height % DOWNSAMPLE_FACTOR != 0 || width % DOWNSAMPLE_FACTOR != 0 {
            if !self.allow_truncation {
                return Err(VggError::InputNotDivisible {
                    shape: self.input_shape,
                    divisor: DOWNSAMPLE_FACTOR,
                });
            }
            log::warn!(
                "Input shape {:?} is not divisible by {DOWNSAMPLE_FACTOR}, post-conv size truncated to {:?}",
                self.input_shape,
                self.post_conv_shape()
            );
        }

        Ok(())
    }

    /// Spatial size of the feature map after the five stages, using floor division.
    pub fn post_conv_shape(&self) -> [usize; 2] {
        let [_, height, width] = self.input_shape;
        [height / DOWNSAMPLE_FACTOR, width / DOWNSAMPLE_FACTOR]
    }

    pub fn classifier(&self) -> ClassifierHeadConfig {
        ClassifierHeadConfig::new(self.post_conv_shape(), self.num_classes)
            .with_dropout(self.dropout)
    }

    /// Input width of the classifier head.
    pub fn flat_size(&self) -> usize {
        self.classifier().flat_size()
    }

    /// Width of the classifier's hidden layers.
    pub fn hidden_width(&self) -> usize {
        self.classifier().hidden_width()
    }

    /// Builds the network topology with freshly initialized parameters.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Vgg<B>> {
        self.validate()?;

        let mut in_channels = self.input_shape[0];
        let mut stages = Vec::with_capacity(NUM_STAGES);
        for (num_blocks, out_channels) in self.stage_config.iter().zip(STAGE_CHANNELS) {
            stages.push(StageConfig::new(in_channels, out_channels, *num_blocks).init(device)?);
            in_channels = out_channels;
        }

        let [stage1, stage2, stage3, stage4, stage5]: [Stage<B>; NUM_STAGES] = stages
            .try_into()
            .map_err(|stages: Vec<Stage<B>>| VggError::InvalidStageCount {
                expected: NUM_STAGES,
                found: stages.len(),
            })?;

        Ok(Vgg {
            stage1,
            stage2,
            stage3,
            stage4,
            stage5,
            classifier: self.classifier().init(device),
        })
    }
}

impl<B: Backend> Vgg<B> {
    /// # Shapes
    ///
    /// - images: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stage1.forward(images);
        let x = self.stage2.forward(x);
        let x = self.stage3.forward(x);
        let x = self.stage4.forward(x);
        let x = self.stage5.forward(x);

        self.classifier.forward(x)
    }

    pub fn stages(&self) -> [&Stage<B>; NUM_STAGES] {
        [
            &self.stage1,
            &self.stage2,
            &self.stage3,
            &self.stage4,
            &self.stage5,
        ]
    }

    pub fn classifier(&self) -> &ClassifierHead<B> {
        &self.classifier
    }

    /// Qualified name and shape of every parameter and running statistic, in module order.
    pub fn layout(&self) -> ParamLayout {
        let mut layout = Vec::new();
        for (i, stage) in self.stages().iter().enumerate() {
            stage.collect_layout(&format!("stage{}", i + 1), &mut layout);
        }
        self.classifier.collect_layout("classifier", &mut layout);

        layout
    }
}
