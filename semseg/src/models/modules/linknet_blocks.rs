use burn::prelude::*;

use super::{
    Conv2dBatchNormRelu, Conv2dBatchNormReluConfig, Deconv2dBatchNormRelu,
    Deconv2dBatchNormReluConfig,
};
use crate::error::{ensure_channels, invalid_config, SemSegResult};

/// Configuration for the `LinknetUp` module.
#[derive(Config, Debug)]
pub struct LinknetUpConfig {
    in_channels: usize,
    /// Must be even; the block works at `out_channels / 2` internally.
    out_channels: usize,
}

impl LinknetUpConfig {
    /// Initializes a new `LinknetUp` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<LinknetUp<B>> {
        ensure_channels("LinknetUp", &[self.in_channels, self.out_channels])?;
        if self.out_channels % 2 != 0 {
            return Err(invalid_config(format!(
                "LinknetUp: out_channels must be even, got {}",
                self.out_channels
            )));
        }
        let mid_channels = self.out_channels / 2;

        let conv_bn_relu1 =
            Conv2dBatchNormReluConfig::new(self.in_channels, mid_channels, 1).init(device);
        let deconv_bn_relu2 = Deconv2dBatchNormReluConfig::new(mid_channels, mid_channels, 2)
            .with_stride(2)
            .init(device);
        let conv_bn_relu3 =
            Conv2dBatchNormReluConfig::new(mid_channels, self.out_channels, 1).init(device);

        Ok(LinknetUp {
            conv_bn_relu1,
            deconv_bn_relu2,
            conv_bn_relu3,
        })
    }
}

/// LinkNet decoder stage: 1x1 reduce, 2x transposed conv, 1x1 expand.
#[derive(Module, Debug)]
pub struct LinknetUp<B: Backend> {
    conv_bn_relu1: Conv2dBatchNormRelu<B>,
    deconv_bn_relu2: Deconv2dBatchNormRelu<B>,
    conv_bn_relu3: Conv2dBatchNormRelu<B>,
}

impl<B: Backend> LinknetUp<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]`
    /// - output: `[batch, out_channels, 2h, 2w]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv_bn_relu1.forward(x);
        let x = self.deconv_bn_relu2.forward(x);
        self.conv_bn_relu3.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn doubles_resolution() {
        let device = Default::default();
        let up = LinknetUpConfig::new(16, 8)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([2, 16, 5, 3], Distribution::Default, &device);
        assert_eq!(up.forward(x).dims(), [2, 8, 10, 6]);
    }

    #[test]
    fn odd_out_channels_is_rejected() {
        let device = Default::default();
        assert!(LinknetUpConfig::new(16, 7)
            .init::<TestBackend>(&device)
            .is_err());
    }
}
