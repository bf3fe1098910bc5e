use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    prelude::*,
};

use super::ParamLayout;

/// Channel depth produced by the last convolution stage.
pub const FEATURE_CHANNELS: usize = 512;

/// Configuration of the fully-connected classifier head.
#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    /// Height and width of the feature map produced by the last stage.
    pub post_conv_shape: [usize; 2],
    pub num_classes: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
}

/// Flatten, then three linear maps separated by dropout and ReLU.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    dropout: Dropout,
    activation: Relu,
}

impl ClassifierHeadConfig {
    /// Number of features entering the head once the feature map is flattened.
    pub fn flat_size(&self) -> usize {
        let [h, w] = self.post_conv_shape;
        h * w * FEATURE_CHANNELS
    }

    /// Width of the hidden layers: 512 when the feature map is a single cell, 4096 otherwise.
    pub fn hidden_width(&self) -> usize {
        let [h, w] = self.post_conv_shape;
        if h * w == 1 {
            512
        } else {
            4096
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        let hidden = self.hidden_width();

        ClassifierHead {
            fc1: LinearConfig::new(self.flat_size(), hidden).init(device),
            fc2: LinearConfig::new(hidden, hidden).init(device),
            fc3: LinearConfig::new(hidden, self.num_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> ClassifierHead<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, 512, post_h, post_w]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = features.flatten::<2>(1, 3);

        let x = self.fc1.forward(x);
        let x = self.dropout.forward(x);
        let x = self.activation.forward(x);

        let x = self.fc2.forward(x);
        let x = self.dropout.forward(x);
        let x = self.activation.forward(x);

        self.fc3.forward(x)
    }

    /// Output width of the first linear map.
    pub fn hidden_width(&self) -> usize {
        self.fc1.weight.dims()[1]
    }

    pub fn num_classes(&self) -> usize {
        self.fc3.weight.dims()[1]
    }

    pub(crate) fn collect_layout(&self, prefix: &str, layout: &mut ParamLayout) {
        for (name, linear) in [("fc1", &self.fc1), ("fc2", &self.fc2), ("fc3", &self.fc3)] {
            layout.push((
                format!("{prefix}.{name}.weight"),
                linear.weight.dims().to_vec(),
            ));
            if let Some(bias) = &linear.bias {
                layout.push((format!("{prefix}.{name}.bias"), bias.dims().to_vec()));
            }
        }
    }
}
