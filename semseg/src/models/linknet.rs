//! # LinkNet
//!
//! ResNet-18 style encoder whose stage outputs are added back onto the decoder
//! path; each [`LinknetUp`] doubles resolution so the sums line up exactly.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
};

use super::modules::{
    Conv2dBatchNormRelu, Conv2dBatchNormReluConfig, Deconv2dBatchNormRelu,
    Deconv2dBatchNormReluConfig, LinknetUp, LinknetUpConfig, ResidualLayer, ResidualLayerConfig,
};
use crate::error::{ensure_channels, invalid_config, SemSegError, SemSegResult};

/// Overall downsampling factor of the encoder.
const OUTPUT_STRIDE: usize = 32;

/// Configuration for the `LinkNet` model.
#[derive(Config, Debug)]
pub struct LinkNetConfig {
    n_classes: usize,
    #[config(default = "3")]
    in_channels: usize,
    /// Divides the reference encoder widths `[64, 128, 256, 512]`.
    #[config(default = "4")]
    feature_scale: usize,
    /// Residual blocks per encoder stage.
    #[config(default = "[2, 2, 2, 2]")]
    layers: [usize; 4],
}

impl LinkNetConfig {
    /// Encoder widths after applying `feature_scale`.
    pub fn filters(&self) -> [usize; 4] {
        [64, 128, 256, 512].map(|f| f / self.feature_scale.max(1))
    }

    /// Initializes a new `LinkNet` model.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<LinkNet<B>> {
        ensure_channels("LinkNet", &[self.in_channels, self.n_classes])?;
        if self.feature_scale == 0 || 32 % self.feature_scale != 0 {
            return Err(invalid_config(format!(
                "LinkNet: feature_scale must divide 32, got {}",
                self.feature_scale
            )));
        }
        let filters = self.filters();
        let head_channels = 32 / self.feature_scale;

        tracing::debug!(?filters, layers = ?self.layers, "building LinkNet");

        let stem = Conv2dBatchNormReluConfig::new(self.in_channels, filters[0], 7)
            .with_stride(2)
            .with_padding(3)
            .with_bias(false)
            .init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let encoder1 = ResidualLayerConfig::new(self.layers[0], filters[0], filters[0]).init(device)?;
        let encoder2 = ResidualLayerConfig::new(self.layers[1], filters[0], filters[1])
            .with_stride(2)
            .init(device)?;
        let encoder3 = ResidualLayerConfig::new(self.layers[2], filters[1], filters[2])
            .with_stride(2)
            .init(device)?;
        let encoder4 = ResidualLayerConfig::new(self.layers[3], filters[2], filters[3])
            .with_stride(2)
            .init(device)?;

        let decoder4 = LinknetUpConfig::new(filters[3], filters[2]).init(device)?;
        let decoder3 = LinknetUpConfig::new(filters[2], filters[1]).init(device)?;
        let decoder2 = LinknetUpConfig::new(filters[1], filters[0]).init(device)?;
        let decoder1 = LinknetUpConfig::new(filters[0], filters[0]).init(device)?;

        let final_deconv = Deconv2dBatchNormReluConfig::new(filters[0], head_channels, 2)
            .with_stride(2)
            .init(device);
        let final_conv = Conv2dBatchNormReluConfig::new(head_channels, head_channels, 3)
            .with_padding(1)
            .init(device);
        let classifier = Conv2dConfig::new([head_channels, self.n_classes], [1, 1]).init(device);

        Ok(LinkNet {
            stem,
            maxpool,
            encoder1,
            encoder2,
            encoder3,
            encoder4,
            decoder4,
            decoder3,
            decoder2,
            decoder1,
            final_deconv,
            final_conv,
            classifier,
        })
    }
}

/// LinkNet encoder/decoder.
#[derive(Module, Debug)]
pub struct LinkNet<B: Backend> {
    stem: Conv2dBatchNormRelu<B>,
    maxpool: MaxPool2d,
    encoder1: ResidualLayer<B>,
    encoder2: ResidualLayer<B>,
    encoder3: ResidualLayer<B>,
    encoder4: ResidualLayer<B>,
    decoder4: LinknetUp<B>,
    decoder3: LinknetUp<B>,
    decoder2: LinknetUp<B>,
    decoder1: LinknetUp<B>,
    final_deconv: Deconv2dBatchNormRelu<B>,
    final_conv: Conv2dBatchNormRelu<B>,
    classifier: Conv2d<B>,
}

impl<B: Backend> LinkNet<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]` with `h` and `w` multiples of 32
    /// - output: `[batch, n_classes, h, w]`
    ///
    /// # Errors
    ///
    /// Returns [`SemSegError::InvalidTensorShape`] if the skip additions cannot line up.
    pub fn forward(&self, x: Tensor<B, 4>) -> SemSegResult<Tensor<B, 4>> {
        let [_, _, height, width] = x.dims();
        if height == 0 || width == 0 || height % OUTPUT_STRIDE != 0 || width % OUTPUT_STRIDE != 0
        {
            return Err(SemSegError::InvalidTensorShape {
                expected: format!("spatial size divisible by {OUTPUT_STRIDE}"),
                actual: format!("{height}x{width}"),
            });
        }

        let x = self.maxpool.forward(self.stem.forward(x));

        let e1 = self.encoder1.forward(x);
        let e2 = self.encoder2.forward(e1.clone());
        let e3 = self.encoder3.forward(e2.clone());
        let e4 = self.encoder4.forward(e3.clone());
        tracing::trace!(shape = ?e4.dims(), "linknet encoder");

        let d4 = self.decoder4.forward(e4) + e3;
        let d3 = self.decoder3.forward(d4) + e2;
        let d2 = self.decoder2.forward(d3) + e1;
        let d1 = self.decoder1.forward(d2);

        let x = self.final_deconv.forward(d1);
        let x = self.final_conv.forward(x);
        Ok(self.classifier.forward(x))
    }
}
