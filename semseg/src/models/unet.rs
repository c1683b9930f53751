//! # U-Net
//!
//! Contracting path of [`UnetDown`] stages separated by 2x2 max-pooling, a
//! center stage, and an expanding path of [`UnetUp`] stages that each consume the
//! matching encoder output. All convolutions are unpadded, so the logits are
//! smaller than the input; [`UNetConfig::output_size`] gives the exact size.

use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
    tensor::module::max_pool2d,
};

use super::modules::{UnetDown, UnetDownConfig, UnetUp, UnetUpConfig};
use crate::error::{ensure_channels, invalid_config, SemSegError, SemSegResult};

/// Configuration for the `UNet` model.
#[derive(Config, Debug)]
pub struct UNetConfig {
    n_classes: usize,
    #[config(default = "3")]
    in_channels: usize,
    /// Divides every entry of `filters`.
    #[config(default = "4")]
    feature_scale: usize,
    /// Reference widths per level; the last entry is the center stage.
    #[config(default = "vec![64, 128, 256, 512, 1024]")]
    filters: Vec<usize>,
    #[config(default = "true")]
    batch_norm: bool,
}

impl UNetConfig {
    /// Filter widths after applying `feature_scale`.
    pub fn scaled_filters(&self) -> Vec<usize> {
        self.filters
            .iter()
            .map(|&f| f / self.feature_scale.max(1))
            .collect()
    }

    /// Spatial size of the logits for a given input size, or `None` if the
    /// input is too small to survive the valid convolutions.
    pub fn output_size(&self, input: usize) -> Option<usize> {
        let levels = self.filters.len().checked_sub(1)?;
        let mut size = input;
        for _ in 0..levels {
            size = size.checked_sub(4).filter(|&s| s >= 2)? / 2;
        }
        size = size.checked_sub(4).filter(|&s| s > 0)?;
        for _ in 0..levels {
            size = (2 * size).checked_sub(4).filter(|&s| s > 0)?;
        }
        Some(size)
    }

    /// Smallest spatial size for which [`Self::output_size`] is `Some`.
    ///
    /// Walks back from the smallest center output that survives every
    /// upsampling stage: one stage needs 3 pixels (3 -> 2), deeper stacks need
    /// the fixed point 4 (4 -> 4).
    pub fn min_input_size(&self) -> usize {
        let levels = self.filters.len().saturating_sub(1);
        let center_output = match levels {
            0 => 1,
            1 => 3,
            _ => 4,
        };
        (0..levels).fold(center_output + 4, |size, _| 2 * size + 4)
    }

    /// Initializes a new `UNet` model.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two levels are configured, a scaled width
    /// is zero, or a level is not exactly twice as wide as the one above it.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<UNet<B>> {
        ensure_channels("UNet", &[self.in_channels, self.n_classes])?;
        if self.feature_scale == 0 {
            return Err(invalid_config("UNet: feature_scale must be at least 1"));
        }
        let filters = self.scaled_filters();
        if filters.len() < 2 {
            return Err(invalid_config(
                "UNet: at least one encoder level and a center stage are required",
            ));
        }
        if let Some(pair) = filters.windows(2).find(|pair| pair[1] != 2 * pair[0]) {
            return Err(invalid_config(format!(
                "UNet: each level must double the width of the previous one, got {} -> {}",
                pair[0], pair[1]
            )));
        }

        tracing::debug!(?filters, n_classes = self.n_classes, "building UNet");

        let levels = filters.len() - 1;
        let mut downs = Vec::with_capacity(levels);
        let mut in_channels = self.in_channels;
        for &width in &filters[..levels] {
            downs.push(
                UnetDownConfig::new(in_channels, width)
                    .with_batch_norm(self.batch_norm)
                    .init(device)?,
            );
            in_channels = width;
        }

        let center = UnetDownConfig::new(filters[levels - 1], filters[levels])
            .with_batch_norm(self.batch_norm)
            .init(device)?;

        // Deepest level first, in the order they are applied.
        let ups = (0..levels)
            .rev()
            .map(|i| UnetUpConfig::new(filters[i + 1], filters[i]).init(device))
            .collect::<SemSegResult<Vec<_>>>()?;

        let final_conv = Conv2dConfig::new([filters[0], self.n_classes], [1, 1]).init(device);

        Ok(UNet {
            downs,
            center,
            ups,
            final_conv,
            min_input: self.min_input_size(),
        })
    }
}

/// U-Net with valid convolutions.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    downs: Vec<UnetDown<B>>,
    center: UnetDown<B>,
    ups: Vec<UnetUp<B>>,
    final_conv: Conv2d<B>,
    min_input: usize,
}

impl<B: Backend> UNet<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]`
    /// - output: `[batch, n_classes, out(h), out(w)]`, see [`UNetConfig::output_size`]
    ///
    /// # Errors
    ///
    /// Returns [`SemSegError::InvalidTensorShape`] if the input is too small.
    pub fn forward(&self, x: Tensor<B, 4>) -> SemSegResult<Tensor<B, 4>> {
        let [_, _, height, width] = x.dims();
        if height < self.min_input || width < self.min_input {
            return Err(SemSegError::InvalidTensorShape {
                expected: format!("spatial size of at least {0}x{0}", self.min_input),
                actual: format!("{height}x{width}"),
            });
        }

        let mut skips = Vec::with_capacity(self.downs.len());
        let mut x = x;
        for down in &self.downs {
            let skip = down.forward(x);
            x = max_pool2d(skip.clone(), [2, 2], [2, 2], [0, 0], [1, 1]);
            skips.push(skip);
        }

        let mut x = self.center.forward(x);
        tracing::trace!(shape = ?x.dims(), "unet center");

        for (up, skip) in self.ups.iter().zip(skips.into_iter().rev()) {
            x = up.forward(x, skip);
        }

        Ok(self.final_conv.forward(x))
    }

    /// Smallest square input the network accepts.
    pub const fn min_input_size(&self) -> usize {
        self.min_input
    }
}
