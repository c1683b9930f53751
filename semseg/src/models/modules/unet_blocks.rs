//! # U-Net stages
//!
//! Contracting and expanding stages of U-Net. Convolutions are unpadded, so every
//! stage trims two pixels per 3x3 convolution; the expanding stage resizes the
//! skip tensor to the upsampled map instead of center-cropping it.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use super::{Conv2dBatchNormRelu, Conv2dBatchNormReluConfig};
use crate::error::{ensure_channels, invalid_config, SemSegResult};

/// Configuration for the `UnetDown` module.
#[derive(Config, Debug)]
pub struct UnetDownConfig {
    in_channels: usize,
    out_channels: usize,
    /// Replace the batch norms with identities when false.
    #[config(default = "true")]
    batch_norm: bool,
}

impl UnetDownConfig {
    /// Initializes a new `UnetDown` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<UnetDown<B>> {
        ensure_channels("UnetDown", &[self.in_channels, self.out_channels])?;

        let conv1 = Conv2dBatchNormReluConfig::new(self.in_channels, self.out_channels, 3)
            .with_batch_norm(self.batch_norm)
            .init(device);
        let conv2 = Conv2dBatchNormReluConfig::new(self.out_channels, self.out_channels, 3)
            .with_batch_norm(self.batch_norm)
            .init(device);

        Ok(UnetDown { conv1, conv2 })
    }
}

/// Two unpadded 3x3 conv + BN + ReLU units.
#[derive(Module, Debug)]
pub struct UnetDown<B: Backend> {
    conv1: Conv2dBatchNormRelu<B>,
    conv2: Conv2dBatchNormRelu<B>,
}

impl<B: Backend> UnetDown<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]`
    /// - output: `[batch, out_channels, h - 4, w - 4]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv2.forward(self.conv1.forward(x))
    }
}

/// Configuration for the `UnetUp` module.
#[derive(Config, Debug)]
pub struct UnetUpConfig {
    /// Channels of the coarse input, and of the concatenated `[skip, upsampled]` tensor.
    in_channels: usize,
    out_channels: usize,
}

impl UnetUpConfig {
    /// Number of channels the skip tensor must carry.
    pub const fn skip_channels(&self) -> usize {
        self.in_channels.saturating_sub(self.out_channels)
    }

    /// Initializes a new `UnetUp` module.
    ///
    /// # Errors
    ///
    /// Returns an error if `in_channels` leaves no room for skip channels.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<UnetUp<B>> {
        ensure_channels("UnetUp", &[self.in_channels, self.out_channels])?;
        if self.in_channels <= self.out_channels {
            return Err(invalid_config(format!(
                "UnetUp: in_channels ({}) must exceed out_channels ({}) to leave room for the skip",
                self.in_channels, self.out_channels
            )));
        }

        let up_conv = ConvTranspose2dConfig::new([self.in_channels, self.out_channels], [2, 2])
            .with_stride([2, 2])
            .init(device);
        let conv1 = Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let conv2 = Conv2dConfig::new([self.out_channels, self.out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        Ok(UnetUp {
            up_conv,
            conv1,
            conv2,
            relu: Relu::new(),
        })
    }
}

/// Transposed-convolution upsampling, skip concatenation and two unpadded 3x3 conv + ReLU.
#[derive(Module, Debug)]
pub struct UnetUp<B: Backend> {
    up_conv: ConvTranspose2d<B>,
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> UnetUp<B> {
    /// # Shapes
    /// - x: `[batch, in_channels, h, w]`
    /// - skip: `[batch, in_channels - out_channels, any, any]`
    /// - output: `[batch, out_channels, 2h - 4, 2w - 4]`
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.merge(x, skip);
        let x = self.relu.forward(self.conv1.forward(x));
        self.relu.forward(self.conv2.forward(x))
    }

    /// Upsamples `x` and stacks it after the (resized) skip on the channel axis.
    fn merge(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.up_conv.forward(x);
        let [_, _, height, width] = x.dims();
        let [_, _, skip_h, skip_w] = skip.dims();

        let skip = if (skip_h, skip_w) == (height, width) {
            skip
        } else {
            interpolate(
                skip,
                [height, width],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            )
        };

        Tensor::cat(vec![skip, x], 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SemSegError;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn down_trims_four_pixels() {
        let device = Default::default();
        let down = UnetDownConfig::new(3, 8).init::<TestBackend>(&device).unwrap();

        let x = Tensor::random([2, 3, 20, 17], Distribution::Default, &device);
        assert_eq!(down.forward(x).dims(), [2, 8, 16, 13]);
    }

    #[test]
    fn up_resizes_skip_and_concatenates() {
        let device = Default::default();
        let up = UnetUpConfig::new(16, 8).init::<TestBackend>(&device).unwrap();

        let x = Tensor::random([1, 16, 6, 6], Distribution::Default, &device);
        // Larger than the upsampled 12x12 map, as produced by the encoder side.
        let skip = Tensor::random([1, 8, 20, 20], Distribution::Default, &device);

        assert_eq!(up.forward(x, skip).dims(), [1, 8, 8, 8]);
    }

    #[test]
    fn skip_channels_come_first() {
        let device = Default::default();
        let up = UnetUpConfig::new(4, 2).init::<TestBackend>(&device).unwrap();

        let x = Tensor::random([1, 4, 3, 3], Distribution::Default, &device);
        let skip = Tensor::random([1, 2, 6, 6], Distribution::Default, &device);
        let upsampled = up.up_conv.forward(x.clone());

        let merged = up.merge(x, skip.clone());
        assert_eq!(merged.dims(), [1, 4, 6, 6]);

        merged
            .clone()
            .slice([0..1, 0..2, 0..6, 0..6])
            .into_data()
            .assert_eq(&skip.into_data(), true);
        merged
            .slice([0..1, 2..4, 0..6, 0..6])
            .into_data()
            .assert_eq(&upsampled.into_data(), true);
    }

    #[test]
    fn down_up_pair_round_trip_shapes() {
        let device = Default::default();
        let down = UnetDownConfig::new(4, 8).init::<TestBackend>(&device).unwrap();
        let center = UnetDownConfig::new(8, 16).init::<TestBackend>(&device).unwrap();
        let up = UnetUpConfig::new(16, 8).init::<TestBackend>(&device).unwrap();

        let x = Tensor::random([1, 4, 28, 28], Distribution::Default, &device);
        let skip = down.forward(x); // 24
        let pooled = burn::tensor::module::max_pool2d(
            skip.clone(),
            [2, 2],
            [2, 2],
            [0, 0],
            [1, 1],
        ); // 12
        let bottom = center.forward(pooled); // 8
        let y = up.forward(bottom, skip); // 16 - 4

        assert_eq!(y.dims(), [1, 8, 12, 12]);
    }

    #[test]
    fn up_rejects_missing_skip_channels() {
        let device = Default::default();
        let result = UnetUpConfig::new(8, 8).init::<TestBackend>(&device);

        match result {
            Err(SemSegError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("must exceed"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn skip_channel_count() {
        assert_eq!(UnetUpConfig::new(128, 64).skip_channels(), 64);
    }
}
