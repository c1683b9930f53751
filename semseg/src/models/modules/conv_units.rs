//! # Fused convolution units
//!
//! The small conv -> norm (-> ReLU) sequences every other block in this crate is
//! assembled from, plus the transposed-convolution variant used by decoders.

use core::marker::PhantomData;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// Stand-in for batch norm when normalization is switched off.
#[derive(Module, Debug)]
pub struct NoNorm<B: Backend> {
    channels: usize,
    _backend: PhantomData<B>,
}

impl<B: Backend> NoNorm<B> {
    pub const fn new(channels: usize) -> Self {
        Self {
            channels,
            _backend: PhantomData,
        }
    }

    /// Returns `x` unchanged.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        debug_assert_eq!(x.dims()[1], self.channels, "NoNorm channel mismatch");
        x
    }
}

/// Normalization slot: batch norm, or a pass-through when normalization is disabled.
#[derive(Module, Debug)]
pub enum NormLayer<B: Backend> {
    BatchNorm(BatchNorm<B, 2>),
    Identity(NoNorm<B>),
}

impl<B: Backend> NormLayer<B> {
    fn new(channels: usize, batch_norm: bool, device: &Device<B>) -> Self {
        if batch_norm {
            Self::BatchNorm(BatchNormConfig::new(channels).init(device))
        } else {
            Self::Identity(NoNorm::new(channels))
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::BatchNorm(bn) => bn.forward(x),
            Self::Identity(no_norm) => no_norm.forward(x),
        }
    }
}

/// Configuration for [`Conv2dBatchNorm`].
#[derive(Config, Debug)]
pub struct Conv2dBatchNormConfig {
    in_channels: usize,
    out_channels: usize,
    /// Square kernel size.
    kernel_size: usize,
    #[config(default = "1")]
    stride: usize,
    #[config(default = "0")]
    padding: usize,
    #[config(default = "1")]
    dilation: usize,
    #[config(default = "true")]
    bias: bool,
    /// Replace the batch norm with an identity when false.
    #[config(default = "true")]
    batch_norm: bool,
    /// Weight initializer for the convolution. `None` keeps Burn's default.
    #[config(default = "None")]
    initializer: Option<Initializer>,
}

impl Conv2dBatchNormConfig {
    /// Initializes a new `Conv2dBatchNorm` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Conv2dBatchNorm<B> {
        let conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
        .with_dilation([self.dilation, self.dilation])
        .with_bias(self.bias);
        let conv = match &self.initializer {
            Some(initializer) => conv.with_initializer(initializer.clone()),
            None => conv,
        }
        .init(device);

        Conv2dBatchNorm {
            conv,
            norm: NormLayer::new(self.out_channels, self.batch_norm, device),
        }
    }
}

/// Convolution followed by batch normalization.
#[derive(Module, Debug)]
pub struct Conv2dBatchNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: NormLayer<B>,
}

impl<B: Backend> Conv2dBatchNorm<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]`
    /// - output: `[batch, out_channels, (h + 2p - d(k - 1) - 1) / s + 1, ...]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Configuration for [`Conv2dBatchNormRelu`].
#[derive(Config, Debug)]
pub struct Conv2dBatchNormReluConfig {
    in_channels: usize,
    out_channels: usize,
    /// Square kernel size.
    kernel_size: usize,
    #[config(default = "1")]
    stride: usize,
    #[config(default = "0")]
    padding: usize,
    #[config(default = "1")]
    dilation: usize,
    #[config(default = "true")]
    bias: bool,
    /// Replace the batch norm with an identity when false.
    #[config(default = "true")]
    batch_norm: bool,
    /// Weight initializer for the convolution. `None` keeps Burn's default.
    #[config(default = "None")]
    initializer: Option<Initializer>,
}

impl Conv2dBatchNormReluConfig {
    /// Initializes a new `Conv2dBatchNormRelu` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Conv2dBatchNormRelu<B> {
        let unit = Conv2dBatchNormConfig::new(self.in_channels, self.out_channels, self.kernel_size)
            .with_stride(self.stride)
            .with_padding(self.padding)
            .with_dilation(self.dilation)
            .with_bias(self.bias)
            .with_batch_norm(self.batch_norm)
            .with_initializer(self.initializer.clone())
            .init(device);

        Conv2dBatchNormRelu {
            unit,
            relu: Relu::new(),
        }
    }
}

/// Convolution, batch normalization and ReLU.
#[derive(Module, Debug)]
pub struct Conv2dBatchNormRelu<B: Backend> {
    unit: Conv2dBatchNorm<B>,
    relu: Relu,
}

impl<B: Backend> Conv2dBatchNormRelu<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.unit.forward(x))
    }
}

/// Configuration for [`Deconv2dBatchNormRelu`].
#[derive(Config, Debug)]
pub struct Deconv2dBatchNormReluConfig {
    in_channels: usize,
    out_channels: usize,
    /// Square kernel size.
    kernel_size: usize,
    #[config(default = "1")]
    stride: usize,
    #[config(default = "0")]
    padding: usize,
    #[config(default = "true")]
    bias: bool,
}

impl Deconv2dBatchNormReluConfig {
    /// Initializes a new `Deconv2dBatchNormRelu` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Deconv2dBatchNormRelu<B> {
        let deconv = ConvTranspose2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding([self.padding, self.padding])
        .with_bias(self.bias)
        .init(device);

        Deconv2dBatchNormRelu {
            deconv,
            bn: BatchNormConfig::new(self.out_channels).init(device),
            relu: Relu::new(),
        }
    }
}

/// Transposed convolution, batch normalization and ReLU.
#[derive(Module, Debug)]
pub struct Deconv2dBatchNormRelu<B: Backend> {
    deconv: ConvTranspose2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> Deconv2dBatchNormRelu<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]`
    /// - output: `[batch, out_channels, (h - 1) * s - 2p + k, (w - 1) * s - 2p + k]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.deconv.forward(x);
        let x = self.bn.forward(x);
        self.relu.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn conv_bn_keeps_size_with_same_padding() {
        let device = Default::default();
        let unit = Conv2dBatchNormConfig::new(3, 8, 3)
            .with_padding(1)
            .init::<TestBackend>(&device);

        let x = Tensor::random([2, 3, 17, 12], Distribution::Default, &device);
        assert_eq!(unit.forward(x).dims(), [2, 8, 17, 12]);
    }

    #[test]
    fn conv_bn_relu_strided_and_dilated() {
        let device = Default::default();
        let strided = Conv2dBatchNormReluConfig::new(4, 6, 3)
            .with_stride(2)
            .with_padding(1)
            .with_bias(false)
            .init::<TestBackend>(&device);
        let dilated = Conv2dBatchNormReluConfig::new(4, 6, 3)
            .with_padding(2)
            .with_dilation(2)
            .init::<TestBackend>(&device);

        let x = Tensor::random([1, 4, 16, 16], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(strided.forward(x.clone()).dims(), [1, 6, 8, 8]);

        let y = dilated.forward(x);
        assert_eq!(y.dims(), [1, 6, 16, 16]);
        // ReLU output is never negative.
        assert!(y.min().into_scalar() >= 0.0);
    }

    #[test]
    fn disabled_batch_norm_uses_identity() {
        let device = Default::default();
        let unit = Conv2dBatchNormConfig::new(2, 2, 1)
            .with_batch_norm(false)
            .with_bias(false)
            .with_initializer(Some(Initializer::Ones))
            .init::<TestBackend>(&device);

        assert!(matches!(unit.norm, NormLayer::Identity(_)));

        // 1x1 all-ones kernel sums the two input channels into each output channel.
        let x = Tensor::<TestBackend, 4>::ones([1, 2, 3, 3], &device);
        let y = unit.forward(x);
        assert_eq!(y.dims(), [1, 2, 3, 3]);
        assert!((y.mean().into_scalar() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn deconv_doubles_with_kernel_two_stride_two() {
        let device = Default::default();
        let unit = Deconv2dBatchNormReluConfig::new(8, 4, 2)
            .with_stride(2)
            .init::<TestBackend>(&device);

        let x = Tensor::random([2, 8, 5, 7], Distribution::Default, &device);
        assert_eq!(unit.forward(x).dims(), [2, 4, 10, 14]);
    }

    #[test]
    fn deconv_output_size_formula() {
        let device = Default::default();
        let unit = Deconv2dBatchNormReluConfig::new(3, 3, 3)
            .with_stride(2)
            .with_padding(1)
            .init::<TestBackend>(&device);

        let x = Tensor::random([1, 3, 6, 6], Distribution::Default, &device);
        // (6 - 1) * 2 - 2 + 3 = 11
        assert_eq!(unit.forward(x).dims(), [1, 3, 11, 11]);
    }
}
