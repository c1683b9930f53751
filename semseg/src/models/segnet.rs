//! # SegNet
//!
//! Five encoder stages with index-tracked pooling mirrored by five decoder
//! stages that unpool with those indices. The logits have the input's spatial
//! size, odd sizes included.

use burn::prelude::*;

use super::modules::{SegnetDown, SegnetDownConfig, SegnetUp, SegnetUpConfig};
use crate::error::{ensure_channels, SemSegError, SemSegResult};

/// Number of pooling stages.
const DEPTH: usize = 5;

/// Configuration for the `SegNet` model.
#[derive(Config, Debug)]
pub struct SegNetConfig {
    n_classes: usize,
    #[config(default = "3")]
    in_channels: usize,
    /// Stage widths, shallowest first.
    #[config(default = "[64, 128, 256, 512, 512]")]
    filters: [usize; DEPTH],
}

impl SegNetConfig {
    /// Smallest spatial size that survives every pooling stage.
    pub const MIN_INPUT_SIZE: usize = 1 << DEPTH;

    /// Initializes a new `SegNet` model.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<SegNet<B>> {
        ensure_channels("SegNet", &self.filters)?;
        ensure_channels("SegNet", &[self.in_channels, self.n_classes])?;
        let [f1, f2, f3, f4, f5] = self.filters;

        tracing::debug!(filters = ?self.filters, n_classes = self.n_classes, "building SegNet");

        Ok(SegNet {
            down1: SegnetDownConfig::down2(self.in_channels, f1).init(device)?,
            down2: SegnetDownConfig::down2(f1, f2).init(device)?,
            down3: SegnetDownConfig::down3(f2, f3).init(device)?,
            down4: SegnetDownConfig::down3(f3, f4).init(device)?,
            down5: SegnetDownConfig::down3(f4, f5).init(device)?,
            up5: SegnetUpConfig::up3(f5, f4).init(device)?,
            up4: SegnetUpConfig::up3(f4, f3).init(device)?,
            up3: SegnetUpConfig::up3(f3, f2).init(device)?,
            up2: SegnetUpConfig::up2(f2, f1).init(device)?,
            up1: SegnetUpConfig::up2(f1, self.n_classes).init(device)?,
        })
    }
}

/// SegNet encoder/decoder.
#[derive(Module, Debug)]
pub struct SegNet<B: Backend> {
    down1: SegnetDown<B>,
    down2: SegnetDown<B>,
    down3: SegnetDown<B>,
    down4: SegnetDown<B>,
    down5: SegnetDown<B>,
    up5: SegnetUp<B>,
    up4: SegnetUp<B>,
    up3: SegnetUp<B>,
    up2: SegnetUp<B>,
    up1: SegnetUp<B>,
}

impl<B: Backend> SegNet<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]`
    /// - output: `[batch, n_classes, h, w]`
    ///
    /// # Errors
    ///
    /// Returns [`SemSegError::InvalidTensorShape`] if `h` or `w` is below
    /// [`SegNetConfig::MIN_INPUT_SIZE`].
    pub fn forward(&self, x: Tensor<B, 4>) -> SemSegResult<Tensor<B, 4>> {
        let [_, _, height, width] = x.dims();
        if height < SegNetConfig::MIN_INPUT_SIZE || width < SegNetConfig::MIN_INPUT_SIZE {
            return Err(SemSegError::InvalidTensorShape {
                expected: format!(
                    "spatial size of at least {0}x{0}",
                    SegNetConfig::MIN_INPUT_SIZE
                ),
                actual: format!("{height}x{width}"),
            });
        }

        let d1 = self.down1.forward(x);
        let d2 = self.down2.forward(d1.output.clone());
        let d3 = self.down3.forward(d2.output.clone());
        let d4 = self.down4.forward(d3.output.clone());
        let d5 = self.down5.forward(d4.output.clone());
        tracing::trace!(shape = ?d5.output.dims(), "segnet bottleneck");

        let x = d5.output.clone();
        let x = self.up5.forward_from(x, d5);
        let x = self.up4.forward_from(x, d4);
        let x = self.up3.forward_from(x, d3);
        let x = self.up2.forward_from(x, d2);
        Ok(self.up1.forward_from(x, d1))
    }
}
