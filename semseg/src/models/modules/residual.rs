//! # Residual blocks
//!
//! The plain two-convolution block used by ResNet-18/34 style encoders, the PSP
//! bottlenecks (projection and identity variants, optionally dilated) and the
//! stacks built from them.

use burn::{
    nn::{Initializer, Relu},
    prelude::*,
};

use super::{
    Conv2dBatchNorm, Conv2dBatchNormConfig, Conv2dBatchNormRelu, Conv2dBatchNormReluConfig,
};
use crate::error::{ensure_channels, invalid_config, SemSegResult};

/// Shortcut projection: 1x1 conv (strided) + BN, applied when the residual shape changes.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    unit: Conv2dBatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.unit.forward(x)
    }

    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        initializer: Option<Initializer>,
        device: &Device<B>,
    ) -> Self {
        let unit = Conv2dBatchNormConfig::new(in_channels, out_channels, 1)
            .with_stride(stride)
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);

        Self { unit }
    }
}

/// Configuration for the `ResidualBlock` module.
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    in_channels: usize,
    out_channels: usize,
    #[config(default = "1")]
    stride: usize,
    /// Force a projection shortcut even when the shapes already match.
    #[config(default = "false")]
    downsample: bool,
    /// Weight initializer for every convolution in the block.
    #[config(default = "None")]
    initializer: Option<Initializer>,
}

impl ResidualBlockConfig {
    /// Output channels per `out_channels`; this block does not widen.
    pub const EXPANSION: usize = 1;

    /// Whether the block will carry a projection shortcut.
    pub const fn needs_downsample(&self) -> bool {
        self.downsample || self.stride != 1 || self.in_channels != self.out_channels
    }

    /// Initializes a new `ResidualBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<ResidualBlock<B>> {
        ensure_channels("ResidualBlock", &[self.in_channels, self.out_channels])?;
        if self.stride == 0 {
            return Err(invalid_config("ResidualBlock: stride must be at least 1"));
        }

        let conv_bn_relu1 = Conv2dBatchNormReluConfig::new(self.in_channels, self.out_channels, 3)
            .with_stride(self.stride)
            .with_padding(1)
            .with_bias(false)
            .with_initializer(self.initializer.clone())
            .init(device);
        let conv_bn2 = Conv2dBatchNormConfig::new(self.out_channels, self.out_channels, 3)
            .with_padding(1)
            .with_bias(false)
            .with_initializer(self.initializer.clone())
            .init(device);

        let downsample = self.needs_downsample().then(|| {
            Downsample::new(
                self.in_channels,
                self.out_channels * Self::EXPANSION,
                self.stride,
                self.initializer.clone(),
                device,
            )
        });

        Ok(ResidualBlock {
            conv_bn_relu1,
            conv_bn2,
            downsample,
            relu: Relu::new(),
        })
    }
}

/// Basic residual block: two 3x3 conv + BN with a shortcut, then ReLU.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv_bn_relu1: Conv2dBatchNormRelu<B>,
    conv_bn2: Conv2dBatchNorm<B>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.conv_bn_relu1.forward(x);
        let out = self.conv_bn2.forward(out);

        self.relu.forward(out + residual)
    }
}

/// Configuration for the `ResidualLayer` module.
#[derive(Config, Debug)]
pub struct ResidualLayerConfig {
    num_blocks: usize,
    in_channels: usize,
    out_channels: usize,
    /// Stride of the first block; the rest use stride 1.
    #[config(default = "1")]
    stride: usize,
}

impl ResidualLayerConfig {
    /// Initializes a new `ResidualLayer` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<ResidualLayer<B>> {
        if self.num_blocks == 0 {
            return Err(invalid_config("ResidualLayer: num_blocks must be at least 1"));
        }

        let blocks = (0..self.num_blocks)
            .map(|b| {
                if b == 0 {
                    ResidualBlockConfig::new(self.in_channels, self.out_channels)
                        .with_stride(self.stride)
                        .init(device)
                } else {
                    ResidualBlockConfig::new(self.out_channels, self.out_channels).init(device)
                }
            })
            .collect::<SemSegResult<Vec<_>>>()?;

        Ok(ResidualLayer { blocks })
    }
}

/// Sequence of basic residual blocks; only the first may change resolution or width.
#[derive(Module, Debug)]
pub struct ResidualLayer<B: Backend> {
    blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResidualLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// 1x1 reduce, 3x3 (strided or dilated), shared by both PSP bottlenecks.
fn bottleneck_reduce<B: Backend>(
    in_channels: usize,
    mid_channels: usize,
    stride: usize,
    dilation: usize,
    device: &Device<B>,
) -> (Conv2dBatchNormRelu<B>, Conv2dBatchNormRelu<B>) {
    let cbr1 = Conv2dBatchNormReluConfig::new(in_channels, mid_channels, 1)
        .with_bias(false)
        .init(device);

    let cbr2 = if dilation > 1 {
        Conv2dBatchNormReluConfig::new(mid_channels, mid_channels, 3)
            .with_padding(dilation)
            .with_dilation(dilation)
            .with_bias(false)
            .init(device)
    } else {
        Conv2dBatchNormReluConfig::new(mid_channels, mid_channels, 3)
            .with_stride(stride)
            .with_padding(1)
            .with_bias(false)
            .init(device)
    };

    (cbr1, cbr2)
}

/// Configuration for the `BottleneckPsp` module.
#[derive(Config, Debug)]
pub struct BottleneckPspConfig {
    in_channels: usize,
    mid_channels: usize,
    out_channels: usize,
    #[config(default = "1")]
    stride: usize,
    #[config(default = "1")]
    dilation: usize,
}

impl BottleneckPspConfig {
    /// Stride actually applied; dilated bottlenecks keep the resolution.
    pub const fn effective_stride(&self) -> usize {
        if self.dilation > 1 {
            1
        } else {
            self.stride
        }
    }

    /// Initializes a new `BottleneckPsp` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<BottleneckPsp<B>> {
        ensure_channels(
            "BottleneckPsp",
            &[self.in_channels, self.mid_channels, self.out_channels],
        )?;
        if self.stride == 0 || self.dilation == 0 {
            return Err(invalid_config(
                "BottleneckPsp: stride and dilation must be at least 1",
            ));
        }

        let stride = self.effective_stride();
        let (cbr1, cbr2) = bottleneck_reduce(
            self.in_channels,
            self.mid_channels,
            stride,
            self.dilation,
            device,
        );
        let cb3 = Conv2dBatchNormConfig::new(self.mid_channels, self.out_channels, 1).init(device);
        let cb4 = Conv2dBatchNormConfig::new(self.in_channels, self.out_channels, 1)
            .with_stride(stride)
            .init(device);

        Ok(BottleneckPsp {
            cbr1,
            cbr2,
            cb3,
            cb4,
            relu: Relu::new(),
        })
    }
}

/// Projection bottleneck: the shortcut is a 1x1 conv + BN matching the output shape.
#[derive(Module, Debug)]
pub struct BottleneckPsp<B: Backend> {
    cbr1: Conv2dBatchNormRelu<B>,
    cbr2: Conv2dBatchNormRelu<B>,
    cb3: Conv2dBatchNorm<B>,
    cb4: Conv2dBatchNorm<B>,
    relu: Relu,
}

impl<B: Backend> BottleneckPsp<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = self.cb4.forward(x.clone());
        let conv = self.cb3.forward(self.cbr2.forward(self.cbr1.forward(x)));
        self.relu.forward(conv + residual)
    }
}

/// Configuration for the `BottleneckIdentityPsp` module.
#[derive(Config, Debug)]
pub struct BottleneckIdentityPspConfig {
    in_channels: usize,
    mid_channels: usize,
    #[config(default = "1")]
    dilation: usize,
}

impl BottleneckIdentityPspConfig {
    /// Initializes a new `BottleneckIdentityPsp` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<BottleneckIdentityPsp<B>> {
        ensure_channels(
            "BottleneckIdentityPsp",
            &[self.in_channels, self.mid_channels],
        )?;
        if self.dilation == 0 {
            return Err(invalid_config(
                "BottleneckIdentityPsp: dilation must be at least 1",
            ));
        }

        let (cbr1, cbr2) =
            bottleneck_reduce(self.in_channels, self.mid_channels, 1, self.dilation, device);
        let cb3 = Conv2dBatchNormConfig::new(self.mid_channels, self.in_channels, 1).init(device);

        Ok(BottleneckIdentityPsp {
            cbr1,
            cbr2,
            cb3,
            relu: Relu::new(),
        })
    }
}

/// Shape-preserving bottleneck with an identity shortcut.
#[derive(Module, Debug)]
pub struct BottleneckIdentityPsp<B: Backend> {
    cbr1: Conv2dBatchNormRelu<B>,
    cbr2: Conv2dBatchNormRelu<B>,
    cb3: Conv2dBatchNorm<B>,
    relu: Relu,
}

impl<B: Backend> BottleneckIdentityPsp<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = x.clone();
        let x = self.cb3.forward(self.cbr2.forward(self.cbr1.forward(x)));
        self.relu.forward(x + residual)
    }
}

/// Configuration for the `ResidualBlockPsp` module.
#[derive(Config, Debug)]
pub struct ResidualBlockPspConfig {
    /// Identity bottlenecks stacked after the projecting one.
    n_blocks: usize,
    in_channels: usize,
    mid_channels: usize,
    out_channels: usize,
    #[config(default = "1")]
    stride: usize,
    #[config(default = "1")]
    dilation: usize,
}

impl ResidualBlockPspConfig {
    /// Initializes a new `ResidualBlockPsp` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<ResidualBlockPsp<B>> {
        let stride = if self.dilation > 1 { 1 } else { self.stride };
        let head = BottleneckPspConfig::new(self.in_channels, self.mid_channels, self.out_channels)
            .with_stride(stride)
            .with_dilation(self.dilation)
            .init(device)?;
        let tail = (0..self.n_blocks)
            .map(|_| {
                BottleneckIdentityPspConfig::new(self.out_channels, self.mid_channels)
                    .with_dilation(self.dilation)
                    .init(device)
            })
            .collect::<SemSegResult<Vec<_>>>()?;

        Ok(ResidualBlockPsp { head, tail })
    }
}

/// A projecting PSP bottleneck followed by `n_blocks` identity bottlenecks.
#[derive(Module, Debug)]
pub struct ResidualBlockPsp<B: Backend> {
    head: BottleneckPsp<B>,
    tail: Vec<BottleneckIdentityPsp<B>>,
}

impl<B: Backend> ResidualBlockPsp<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.head.forward(x);
        self.tail.iter().fold(x, |x, block| block.forward(x))
    }

    /// Number of bottlenecks in the stack.
    pub fn depth(&self) -> usize {
        1 + self.tail.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        tensor::{activation::relu, Distribution, Tolerance},
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn residual_block_identity_shortcut() {
        let device = Default::default();
        let config = ResidualBlockConfig::new(8, 8);
        assert!(!config.needs_downsample());

        let block = config.init::<TestBackend>(&device).unwrap();
        let x = Tensor::random([2, 8, 9, 9], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(block.forward(x).dims(), [2, 8, 9, 9]);
    }

    #[test]
    fn residual_block_with_zero_weights_is_relu_of_input() {
        let device = Default::default();
        let block = ResidualBlockConfig::new(3, 3)
            .with_initializer(Some(Initializer::Zeros))
            .init::<TestBackend>(&device)
            .unwrap();

        // Inference-mode batch norm maps the all-zero main path to zero.
        let x = Tensor::<TestBackend, 4>::random([1, 3, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let y = block.forward(x.clone());

        y.into_data()
            .assert_approx_eq::<f32>(&relu(x).into_data(), Tolerance::default());
    }

    #[test]
    fn residual_block_projects_on_stride() {
        let device = Default::default();
        let config = ResidualBlockConfig::new(4, 8).with_stride(2);
        assert!(config.needs_downsample());

        let block = config.init::<TestBackend>(&device).unwrap();
        let x = Tensor::random([1, 4, 10, 10], Distribution::Default, &device);
        assert_eq!(block.forward(x).dims(), [1, 8, 5, 5]);
    }

    #[test]
    fn residual_block_forced_downsample() {
        let device = Default::default();
        let block = ResidualBlockConfig::new(4, 4)
            .with_downsample(true)
            .init::<TestBackend>(&device)
            .unwrap();

        assert!(block.downsample.is_some());
    }

    #[test]
    fn residual_layer_stride_on_first_block_only() {
        let device = Default::default();
        let layer = ResidualLayerConfig::new(3, 4, 16)
            .with_stride(2)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([1, 4, 16, 16], Distribution::Default, &device);
        assert_eq!(layer.forward(x).dims(), [1, 16, 8, 8]);
    }

    #[test]
    fn bottleneck_psp_strided_projection() {
        let device = Default::default();
        let block = BottleneckPspConfig::new(8, 4, 16)
            .with_stride(2)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([1, 8, 12, 12], Distribution::Default, &device);
        assert_eq!(block.forward(x).dims(), [1, 16, 6, 6]);
    }

    #[test]
    fn dilated_bottleneck_ignores_stride() {
        let device = Default::default();
        let config = BottleneckPspConfig::new(8, 4, 16)
            .with_stride(2)
            .with_dilation(2);
        assert_eq!(config.effective_stride(), 1);

        let block = config.init::<TestBackend>(&device).unwrap();
        let x = Tensor::random([1, 8, 12, 12], Distribution::Default, &device);
        assert_eq!(block.forward(x).dims(), [1, 16, 12, 12]);
    }

    #[test]
    fn identity_bottleneck_preserves_shape() {
        let device = Default::default();
        let block = BottleneckIdentityPspConfig::new(16, 4)
            .with_dilation(4)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([2, 16, 7, 7], Distribution::Default, &device);
        let y = block.forward(x);
        assert_eq!(y.dims(), [2, 16, 7, 7]);
        assert!(y.min().into_scalar() >= 0.0);
    }

    #[test]
    fn residual_block_psp_stack() {
        let device = Default::default();
        let stack = ResidualBlockPspConfig::new(3, 8, 4, 16)
            .with_stride(2)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(stack.depth(), 4);

        let x = Tensor::random([1, 8, 10, 10], Distribution::Default, &device);
        assert_eq!(stack.forward(x).dims(), [1, 16, 5, 5]);
    }

    #[test]
    fn residual_block_psp_dilation_forces_unit_stride() {
        let device = Default::default();
        let stack = ResidualBlockPspConfig::new(2, 8, 4, 16)
            .with_stride(2)
            .with_dilation(2)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([1, 8, 10, 10], Distribution::Default, &device);
        assert_eq!(stack.forward(x).dims(), [1, 16, 10, 10]);
    }

    #[test]
    fn residual_block_psp_without_identity_blocks() {
        let device = Default::default();
        let stack = ResidualBlockPspConfig::new(0, 8, 4, 16)
            .with_stride(2)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(stack.depth(), 1);

        let x = Tensor::random([1, 8, 10, 10], Distribution::Default, &device);
        assert_eq!(stack.forward(x).dims(), [1, 16, 5, 5]);
    }
}
