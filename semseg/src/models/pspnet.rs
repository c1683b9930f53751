//! # PSPNet
//!
//! A dilated residual trunk (output stride 8) feeding a [`PyramidPooling`]
//! module, a 3x3 fusion unit and a 1x1 classifier. Logits are upsampled back to
//! the input size. An optional auxiliary head classifies the layer-4 features.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use super::modules::{
    Conv2dBatchNormRelu, Conv2dBatchNormReluConfig, PyramidPooling, PyramidPoolingConfig,
    ResidualBlockPsp, ResidualBlockPspConfig,
};
use crate::{
    config::PoolingMode,
    error::{ensure_channels, invalid_config, SemSegResult},
};

/// Strides of the four residual stages.
const STRIDES: [usize; 4] = [1, 2, 1, 1];
/// Dilations of the four residual stages.
const DILATIONS: [usize; 4] = [1, 1, 2, 4];

/// Configuration for the `PspNet` model.
#[derive(Config, Debug)]
pub struct PspNetConfig {
    n_classes: usize,
    #[config(default = "3")]
    in_channels: usize,
    /// Stem width; the trunk ends at `32 * base_channels`.
    #[config(default = "64")]
    base_channels: usize,
    /// Identity bottlenecks per residual stage after the projecting one
    /// (ResNet-101 layout by default).
    #[config(default = "[2, 3, 22, 2]")]
    n_blocks: [usize; 4],
    #[config(default = "vec![6, 3, 2, 1]")]
    pool_sizes: Vec<usize>,
    #[config(default = "PoolingMode::Adaptive")]
    pooling_mode: PoolingMode,
    /// Dropout probability before the classifiers, in `[0, 1]`.
    #[config(default = "0.1")]
    dropout: f64,
    /// Build the auxiliary classifier on the layer-4 features.
    #[config(default = "false")]
    aux_head: bool,
}

impl PspNetConfig {
    /// Initializes a new `PspNet` model.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<PspNet<B>> {
        ensure_channels(
            "PspNet",
            &[self.in_channels, self.base_channels, self.n_classes],
        )?;
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(invalid_config(format!(
                "PspNet: dropout must be in [0, 1], got {}",
                self.dropout
            )));
        }
        let b = self.base_channels;

        tracing::debug!(
            base_channels = b,
            n_blocks = ?self.n_blocks,
            pool_sizes = ?self.pool_sizes,
            "building PspNet"
        );

        let cbr = |in_channels: usize, out_channels: usize, stride: usize| {
            Conv2dBatchNormReluConfig::new(in_channels, out_channels, 3)
                .with_stride(stride)
                .with_padding(1)
                .with_bias(false)
                .init(device)
        };

        let stem = [
            cbr(self.in_channels, b, 2),
            cbr(b, b, 1),
            cbr(b, 2 * b, 1),
        ];
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // (in, mid, out) per stage
        let widths = [
            (2 * b, b, 4 * b),
            (4 * b, 2 * b, 8 * b),
            (8 * b, 4 * b, 16 * b),
            (16 * b, 8 * b, 32 * b),
        ];
        let stage = |i: usize| {
            let (in_c, mid_c, out_c) = widths[i];
            ResidualBlockPspConfig::new(self.n_blocks[i], in_c, mid_c, out_c)
                .with_stride(STRIDES[i])
                .with_dilation(DILATIONS[i])
                .init(device)
        };
        let res2 = stage(0)?;
        let res3 = stage(1)?;
        let res4 = stage(2)?;
        let res5 = stage(3)?;

        let ppm_config = PyramidPoolingConfig::new(32 * b, self.pool_sizes.clone())
            .with_mode(self.pooling_mode.clone());
        let ppm_channels = ppm_config.out_channels();
        let pyramid_pooling = ppm_config.init(device)?;

        let cbr_final = cbr(ppm_channels, 8 * b, 1);
        let classification = Conv2dConfig::new([8 * b, self.n_classes], [1, 1]).init(device);

        let aux = self.aux_head.then(|| AuxHead {
            cbr: cbr(16 * b, 4 * b, 1),
            classification: Conv2dConfig::new([4 * b, self.n_classes], [1, 1]).init(device),
        });

        let [cbr1_1, cbr1_2, cbr1_3] = stem;

        Ok(PspNet {
            cbr1_1,
            cbr1_2,
            cbr1_3,
            maxpool,
            res2,
            res3,
            res4,
            res5,
            pyramid_pooling,
            cbr_final,
            dropout: DropoutConfig::new(self.dropout).init(),
            classification,
            aux,
        })
    }
}

/// Auxiliary classifier used as deep supervision during training.
#[derive(Module, Debug)]
pub struct AuxHead<B: Backend> {
    cbr: Conv2dBatchNormRelu<B>,
    classification: Conv2d<B>,
}

/// Logits of a PSPNet pass.
#[derive(Debug, Clone)]
pub struct PspNetOutput<B: Backend> {
    /// Main logits at input resolution.
    pub logits: Tensor<B, 4>,
    /// Auxiliary logits at input resolution, when the head is built.
    pub aux_logits: Option<Tensor<B, 4>>,
}

/// Pyramid Scene Parsing Network.
#[derive(Module, Debug)]
pub struct PspNet<B: Backend> {
    cbr1_1: Conv2dBatchNormRelu<B>,
    cbr1_2: Conv2dBatchNormRelu<B>,
    cbr1_3: Conv2dBatchNormRelu<B>,
    maxpool: MaxPool2d,
    res2: ResidualBlockPsp<B>,
    res3: ResidualBlockPsp<B>,
    res4: ResidualBlockPsp<B>,
    res5: ResidualBlockPsp<B>,
    pyramid_pooling: PyramidPooling<B>,
    cbr_final: Conv2dBatchNormRelu<B>,
    dropout: Dropout,
    classification: Conv2d<B>,
    aux: Option<AuxHead<B>>,
}

impl<B: Backend> PspNet<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]`
    /// - output: `[batch, n_classes, h, w]`
    pub fn forward(&self, x: Tensor<B, 4>) -> SemSegResult<Tensor<B, 4>> {
        self.forward_with_aux(x).map(|output| output.logits)
    }

    /// Forward pass that also evaluates the auxiliary head, if present.
    ///
    /// # Errors
    ///
    /// Propagates pyramid pooling shape errors (kernel mode only).
    pub fn forward_with_aux(&self, x: Tensor<B, 4>) -> SemSegResult<PspNetOutput<B>> {
        let [_, _, height, width] = x.dims();

        let x = self.cbr1_1.forward(x);
        let x = self.cbr1_2.forward(x);
        let x = self.cbr1_3.forward(x);
        let x = self.maxpool.forward(x);

        let x = self.res2.forward(x);
        let x = self.res3.forward(x);
        let x = self.res4.forward(x);
        let aux_features = self.aux.as_ref().map(|_| x.clone());
        let x = self.res5.forward(x);
        tracing::trace!(shape = ?x.dims(), "pspnet trunk");

        let x = self.pyramid_pooling.forward(x)?;
        let x = self.cbr_final.forward(x);
        let x = self.dropout.forward(x);
        let x = self.classification.forward(x);
        let logits = upsample(x, [height, width]);

        let aux_logits = match (&self.aux, aux_features) {
            (Some(head), Some(features)) => {
                let x = head.cbr.forward(features);
                let x = self.dropout.forward(x);
                Some(upsample(head.classification.forward(x), [height, width]))
            }
            _ => None,
        };

        Ok(PspNetOutput { logits, aux_logits })
    }
}

fn upsample<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Bilinear))
}
