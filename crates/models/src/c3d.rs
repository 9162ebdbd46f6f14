use crate::pool::{max_pool3d, window_for};
use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of convolutions per stage (conv1, conv2, conv3a/b, conv4a/b, conv5a/b).
const CONVS_PER_STAGE: [usize; 5] = [1, 1, 2, 2, 2];

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown layer {0:?} (expected fc6/dense_1, fc7/dense_2 or fc8/dense_3)")]
    UnknownLayer(String),
    #[error("invalid model config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct C3dConfig {
    /// Frames per clip.
    pub frames: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub num_classes: usize,
    /// Output channels of the five convolution stages.
    pub stage_widths: [usize; 5],
    /// Width of fc6 and fc7.
    pub fc_hidden: usize,
    pub dropout: f64,
}

impl Default for C3dConfig {
    fn default() -> Self {
        Self {
            frames: 16,
            height: 224,
            width: 224,
            channels: 3,
            num_classes: 3,
            stage_widths: [64, 128, 256, 512, 512],
            fc_hidden: 4096,
            dropout: 0.5,
        }
    }
}

impl C3dConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.frames == 0 || self.height == 0 || self.width == 0 {
            return Err(ModelError::InvalidConfig(format!(
                "clip shape must be non-zero, got {}x{}x{}",
                self.frames, self.height, self.width
            )));
        }
        if self.channels == 0 || self.num_classes == 0 || self.fc_hidden == 0 {
            return Err(ModelError::InvalidConfig(
                "channels, num_classes and fc_hidden must be non-zero".to_string(),
            ));
        }
        if self.stage_widths.iter().any(|w| *w == 0) {
            return Err(ModelError::InvalidConfig(format!(
                "stage widths must be non-zero, got {:?}",
                self.stage_widths
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Pool window for the given stage and input extent `[depth, height, width]`.
    pub fn pool_window(stage: usize, dims: [usize; 3]) -> [usize; 3] {
        let kt = if stage == 0 { 1 } else { 2 };
        [
            window_for(dims[0], kt),
            window_for(dims[1], 2),
            window_for(dims[2], 2),
        ]
    }

    /// `[depth, height, width]` after all five pooling stages.
    pub fn pooled_dims(&self) -> [usize; 3] {
        let mut dims = [self.frames, self.height, self.width];
        for stage in 0..CONVS_PER_STAGE.len() {
            let w = Self::pool_window(stage, dims);
            dims = [dims[0] / w[0], dims[1] / w[1], dims[2] / w[2]];
        }
        dims
    }

    /// Input width of fc6.
    pub fn flattened_dim(&self) -> usize {
        let [d, h, w] = self.pooled_dims();
        self.stage_widths[4] * d * h * w
    }

    /// Weight shapes a model built from this config carries, convolutions first
    /// (`[out, in, 3, 3, 3]`) then fc6, fc7 and fc8 (`[in, out]`).
    pub fn weight_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = Vec::new();
        let mut in_channels = self.channels;
        for (stage, convs) in CONVS_PER_STAGE.iter().enumerate() {
            let out_channels = self.stage_widths[stage];
            for _ in 0..*convs {
                shapes.push(vec![out_channels, in_channels, 3, 3, 3]);
                in_channels = out_channels;
            }
        }
        shapes.push(vec![self.flattened_dim(), self.fc_hidden]);
        shapes.push(vec![self.fc_hidden, self.fc_hidden]);
        shapes.push(vec![self.fc_hidden, self.num_classes]);
        shapes
    }
}

/// Named output layers of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C3dLayer {
    /// First dense layer, post-ReLU.
    Fc6,
    /// Second dense layer, post-ReLU.
    Fc7,
    /// Class head, softmax probabilities.
    Fc8,
}

impl C3dLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            C3dLayer::Fc6 => "fc6",
            C3dLayer::Fc7 => "fc7",
            C3dLayer::Fc8 => "fc8",
        }
    }

    /// Output width of this layer for a given config.
    pub fn output_dim(&self, cfg: &C3dConfig) -> usize {
        match self {
            C3dLayer::Fc6 | C3dLayer::Fc7 => cfg.fc_hidden,
            C3dLayer::Fc8 => cfg.num_classes,
        }
    }
}

impl fmt::Display for C3dLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for C3dLayer {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Keras-style dense_N names are accepted for checkpoints described that way.
        match s.trim().to_ascii_lowercase().as_str() {
            "fc6" | "dense_1" => Ok(C3dLayer::Fc6),
            "fc7" | "dense_2" => Ok(C3dLayer::Fc7),
            "fc8" | "dense_3" => Ok(C3dLayer::Fc8),
            _ => Err(ModelError::UnknownLayer(s.to_string())),
        }
    }
}

#[derive(Debug, Module)]
pub struct C3dStage<B: Backend> {
    convs: Vec<Conv3d<B>>,
}

impl<B: Backend> C3dStage<B> {
    fn new(in_channels: usize, out_channels: usize, convs: usize, device: &B::Device) -> Self {
        let mut layers = Vec::with_capacity(convs);
        let mut channels = in_channels;
        for _ in 0..convs {
            layers.push(
                Conv3dConfig::new([channels, out_channels], [3, 3, 3])
                    .with_padding(nn::PaddingConfig3d::Explicit(1, 1, 1))
                    .init(device),
            );
            channels = out_channels;
        }
        Self { convs: layers }
    }

    fn forward(&self, x: Tensor<B, 5>, stage: usize) -> Tensor<B, 5> {
        let mut x = x;
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        let [_, _, d, h, w] = x.dims();
        let window = C3dConfig::pool_window(stage, [d, h, w]);
        max_pool3d(x, window)
    }
}

/// C3D clip classifier over `[batch, channels, frames, height, width]` inputs.
#[derive(Debug, Module)]
pub struct C3d<B: Backend> {
    stages: Vec<C3dStage<B>>,
    fc6: nn::Linear<B>,
    fc7: nn::Linear<B>,
    fc8: nn::Linear<B>,
    dropout: nn::Dropout,
    flattened: usize,
}

impl<B: Backend> C3d<B> {
    pub fn new(cfg: &C3dConfig, device: &B::Device) -> Self {
        let mut stages = Vec::with_capacity(CONVS_PER_STAGE.len());
        let mut in_channels = cfg.channels;
        for (stage, convs) in CONVS_PER_STAGE.iter().enumerate() {
            let out_channels = cfg.stage_widths[stage];
            stages.push(C3dStage::new(in_channels, out_channels, *convs, device));
            in_channels = out_channels;
        }
        let flattened = cfg.flattened_dim();
        let fc6 = nn::LinearConfig::new(flattened, cfg.fc_hidden).init(device);
        let fc7 = nn::LinearConfig::new(cfg.fc_hidden, cfg.fc_hidden).init(device);
        let fc8 = nn::LinearConfig::new(cfg.fc_hidden, cfg.num_classes).init(device);
        let dropout = nn::DropoutConfig::new(cfg.dropout).init();
        Self {
            stages,
            fc6,
            fc7,
            fc8,
            dropout,
            flattened,
        }
    }

    /// Shapes of the weights actually held, in [`C3dConfig::weight_shapes`] order.
    pub fn weight_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes: Vec<Vec<usize>> = self
            .stages
            .iter()
            .flat_map(|stage| stage.convs.iter())
            .map(|conv| conv.weight.dims().to_vec())
            .collect();
        for fc in [&self.fc6, &self.fc7, &self.fc8] {
            shapes.push(fc.weight.dims().to_vec());
        }
        shapes
    }

    /// Convolutional trunk, flattened to `[batch, flattened_dim]`.
    fn features(&self, clips: Tensor<B, 5>) -> Tensor<B, 2> {
        let mut x = clips;
        for (stage, block) in self.stages.iter().enumerate() {
            x = block.forward(x, stage);
        }
        let batch = x.dims()[0];
        x.reshape([batch, self.flattened])
    }

    /// Class logits (no softmax; pair with cross-entropy).
    pub fn forward(&self, clips: Tensor<B, 5>) -> Tensor<B, 2> {
        let x = relu(self.fc6.forward(self.features(clips)));
        let x = relu(self.fc7.forward(self.dropout.forward(x)));
        self.fc8.forward(self.dropout.forward(x))
    }

    /// Output of a named layer; the rest of the network is not evaluated.
    pub fn forward_layer(&self, clips: Tensor<B, 5>, layer: C3dLayer) -> Tensor<B, 2> {
        let x = relu(self.fc6.forward(self.features(clips)));
        if layer == C3dLayer::Fc6 {
            return x;
        }
        let x = relu(self.fc7.forward(self.dropout.forward(x)));
        if layer == C3dLayer::Fc7 {
            return x;
        }
        softmax(self.fc8.forward(self.dropout.forward(x)), 1)
    }
}
