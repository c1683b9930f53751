//! # SegNet stages
//!
//! Each encoder stage ends in a 2x2 max-pool that remembers where every maximum
//! came from. Its decoder partner consumes those indices together with the
//! pre-pool shape so unpooling lands values on their original pixels, odd
//! spatial sizes included.

use burn::prelude::*;
use burn_extra_ops::{MaxPool2dIndexed, MaxPool2dIndexedConfig, MaxUnpool2d, MaxUnpool2dConfig};

use super::{Conv2dBatchNormRelu, Conv2dBatchNormReluConfig};
use crate::error::{ensure_channels, invalid_config, SemSegResult};

/// What an encoder stage hands to its decoder partner.
#[derive(Debug, Clone)]
pub struct SegnetDownOutput<B: Backend> {
    /// Pooled features, half the spatial size (rounded down).
    pub output: Tensor<B, 4>,
    /// Argmax positions of the pooling pass.
    pub indices: Tensor<B, 4, Int>,
    /// Shape of the features right before pooling.
    pub unpool_shape: [usize; 4],
}

fn conv3x3<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    device: &Device<B>,
) -> Conv2dBatchNormRelu<B> {
    Conv2dBatchNormReluConfig::new(in_channels, out_channels, 3)
        .with_padding(1)
        .init(device)
}

fn ensure_depth(module: &str, n_convs: usize) -> SemSegResult<()> {
    if n_convs == 0 {
        return Err(invalid_config(format!(
            "{module}: at least one convolution is required"
        )));
    }
    Ok(())
}

/// Configuration for the `SegnetDown` module.
#[derive(Config, Debug)]
pub struct SegnetDownConfig {
    in_channels: usize,
    out_channels: usize,
    /// Number of 3x3 conv + BN + ReLU units before pooling.
    #[config(default = "2")]
    n_convs: usize,
}

impl SegnetDownConfig {
    /// Two-convolution encoder stage.
    pub fn down2(in_channels: usize, out_channels: usize) -> Self {
        Self::new(in_channels, out_channels).with_n_convs(2)
    }

    /// Three-convolution encoder stage.
    pub fn down3(in_channels: usize, out_channels: usize) -> Self {
        Self::new(in_channels, out_channels).with_n_convs(3)
    }

    /// Initializes a new `SegnetDown` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<SegnetDown<B>> {
        ensure_channels("SegnetDown", &[self.in_channels, self.out_channels])?;
        ensure_depth("SegnetDown", self.n_convs)?;

        let convs = (0..self.n_convs)
            .map(|i| {
                let in_channels = if i == 0 {
                    self.in_channels
                } else {
                    self.out_channels
                };
                conv3x3(in_channels, self.out_channels, device)
            })
            .collect();

        Ok(SegnetDown {
            convs,
            pool: MaxPool2dIndexedConfig::new().init(),
        })
    }
}

/// SegNet encoder stage: 3x3 conv units then an index-tracked 2x2 max-pool.
#[derive(Module, Debug)]
pub struct SegnetDown<B: Backend> {
    convs: Vec<Conv2dBatchNormRelu<B>>,
    pool: MaxPool2dIndexed,
}

impl<B: Backend> SegnetDown<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> SegnetDownOutput<B> {
        let x = self.convs.iter().fold(x, |x, conv| conv.forward(x));
        let pooled = self.pool.forward(x);

        SegnetDownOutput {
            output: pooled.output,
            indices: pooled.indices,
            unpool_shape: pooled.input_shape,
        }
    }
}

/// Configuration for the `SegnetUp` module.
#[derive(Config, Debug)]
pub struct SegnetUpConfig {
    in_channels: usize,
    out_channels: usize,
    /// Number of 3x3 conv + BN + ReLU units after unpooling.
    #[config(default = "2")]
    n_convs: usize,
}

impl SegnetUpConfig {
    /// Two-convolution decoder stage.
    pub fn up2(in_channels: usize, out_channels: usize) -> Self {
        Self::new(in_channels, out_channels).with_n_convs(2)
    }

    /// Three-convolution decoder stage.
    pub fn up3(in_channels: usize, out_channels: usize) -> Self {
        Self::new(in_channels, out_channels).with_n_convs(3)
    }

    /// Initializes a new `SegnetUp` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<SegnetUp<B>> {
        ensure_channels("SegnetUp", &[self.in_channels, self.out_channels])?;
        ensure_depth("SegnetUp", self.n_convs)?;

        // Channels stay at `in_channels` until the last unit.
        let convs = (0..self.n_convs)
            .map(|i| {
                let out_channels = if i + 1 == self.n_convs {
                    self.out_channels
                } else {
                    self.in_channels
                };
                conv3x3(self.in_channels, out_channels, device)
            })
            .collect();

        Ok(SegnetUp {
            unpool: MaxUnpool2dConfig::new().init(),
            convs,
        })
    }
}

/// SegNet decoder stage: max-unpool to the recorded shape, then 3x3 conv units.
#[derive(Module, Debug)]
pub struct SegnetUp<B: Backend> {
    unpool: MaxUnpool2d,
    convs: Vec<Conv2dBatchNormRelu<B>>,
}

impl<B: Backend> SegnetUp<B> {
    /// # Shapes
    /// - x, indices: `[batch, in_channels, h, w]`
    /// - output: `[batch, out_channels, unpool_shape[2], unpool_shape[3]]`
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        indices: Tensor<B, 4, Int>,
        unpool_shape: [usize; 4],
    ) -> Tensor<B, 4> {
        let x = self
            .unpool
            .forward(x, indices, [unpool_shape[2], unpool_shape[3]]);
        self.convs.iter().fold(x, |x, conv| conv.forward(x))
    }

    /// Convenience for feeding an encoder stage's output straight back.
    pub fn forward_from(&self, x: Tensor<B, 4>, skip: SegnetDownOutput<B>) -> Tensor<B, 4> {
        self.forward(x, skip.indices, skip.unpool_shape)
    }
}
