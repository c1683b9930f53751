//! # Pyramid Pooling Module
//!
//! Aggregates context at several scales: every branch average-pools the input,
//! projects it to `in_channels / n_branches` with a 1x1 conv + BN + ReLU and
//! upsamples it back bilinearly. The branches are concatenated after the input.

use burn::{
    prelude::*,
    tensor::{
        module::{adaptive_avg_pool2d, avg_pool2d, interpolate},
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use super::{Conv2dBatchNormRelu, Conv2dBatchNormReluConfig};
use crate::{
    config::PoolingMode,
    error::{ensure_channels, invalid_config, SemSegError, SemSegResult},
};

/// One pyramid level: average pool to `pool_size`, then project.
#[derive(Module, Debug)]
pub struct PyramidBranch<B: Backend> {
    project: Conv2dBatchNormRelu<B>,
    pool_size: usize,
    /// `pool_size` is a bin count rather than a window.
    adaptive: bool,
}

impl<B: Backend> PyramidBranch<B> {
    fn pool(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let size = [self.pool_size, self.pool_size];
        if self.adaptive {
            adaptive_avg_pool2d(x, size)
        } else {
            avg_pool2d(x, size, [1, 1], [0, 0], true)
        }
    }
}

/// Configuration for the `PyramidPooling` module.
#[derive(Config, Debug)]
pub struct PyramidPoolingConfig {
    in_channels: usize,
    /// One branch per entry.
    pool_sizes: Vec<usize>,
    #[config(default = "PoolingMode::Kernel")]
    mode: PoolingMode,
}

impl PyramidPoolingConfig {
    /// Channels of each projected branch.
    pub fn branch_channels(&self) -> usize {
        self.in_channels / self.pool_sizes.len().max(1)
    }

    /// Channels of the concatenated output.
    pub fn out_channels(&self) -> usize {
        self.in_channels + self.pool_sizes.len() * self.branch_channels()
    }

    /// Initializes a new `PyramidPooling` module.
    ///
    /// # Errors
    ///
    /// Returns an error if `pool_sizes` is empty, contains a zero, or has more
    /// entries than `in_channels` (which would leave branches without channels).
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<PyramidPooling<B>> {
        ensure_channels("PyramidPooling", &[self.in_channels])?;
        if self.pool_sizes.is_empty() {
            return Err(invalid_config("PyramidPooling: pool_sizes must not be empty"));
        }
        if self.pool_sizes.contains(&0) {
            return Err(invalid_config(format!(
                "PyramidPooling: pool sizes must be positive, got {:?}",
                self.pool_sizes
            )));
        }
        let branch_channels = self.branch_channels();
        if branch_channels == 0 {
            return Err(invalid_config(format!(
                "PyramidPooling: {} channels cannot be split across {} branches",
                self.in_channels,
                self.pool_sizes.len()
            )));
        }

        let branches = self
            .pool_sizes
            .iter()
            .map(|&size| {
                let project = Conv2dBatchNormReluConfig::new(self.in_channels, branch_channels, 1)
                    .with_bias(false)
                    .init(device);

                PyramidBranch {
                    project,
                    pool_size: size,
                    adaptive: self.mode == PoolingMode::Adaptive,
                }
            })
            .collect();

        Ok(PyramidPooling { branches })
    }
}

/// Multi-scale average pooling with per-scale projection and channel concatenation.
#[derive(Module, Debug)]
pub struct PyramidPooling<B: Backend> {
    branches: Vec<PyramidBranch<B>>,
}

impl<B: Backend> PyramidPooling<B> {
    /// # Shapes
    /// - input: `[batch, in_channels, h, w]`
    /// - output: `[batch, in_channels + n * (in_channels / n), h, w]`
    ///
    /// # Errors
    ///
    /// In kernel mode, returns [`SemSegError::InvalidTensorShape`] if a pooling
    /// window is larger than the feature map.
    pub fn forward(&self, x: Tensor<B, 4>) -> SemSegResult<Tensor<B, 4>> {
        let [_, _, height, width] = x.dims();

        let mut slices = Vec::with_capacity(self.branches.len() + 1);
        slices.push(x.clone());

        for branch in &self.branches {
            if !branch.adaptive && (branch.pool_size > height || branch.pool_size > width) {
                return Err(SemSegError::InvalidTensorShape {
                    expected: format!("spatial size of at least {0}x{0}", branch.pool_size),
                    actual: format!("{height}x{width}"),
                });
            }
            let projected = branch.project.forward(branch.pool(x.clone()));
            slices.push(interpolate(
                projected,
                [height, width],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            ));
        }

        Ok(Tensor::cat(slices, 1))
    }

    /// Number of pyramid levels.
    pub fn levels(&self) -> usize {
        self.branches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn kernel_mode_concatenates_all_branches() {
        let device = Default::default();
        let config = PyramidPoolingConfig::new(16, vec![1, 2, 3, 6]);
        assert_eq!(config.branch_channels(), 4);
        assert_eq!(config.out_channels(), 32);

        let ppm = config.init::<TestBackend>(&device).unwrap();
        assert_eq!(ppm.levels(), 4);

        let x = Tensor::random([2, 16, 9, 11], Distribution::Default, &device);
        assert_eq!(ppm.forward(x).unwrap().dims(), [2, 32, 9, 11]);
    }

    #[test]
    fn adaptive_mode_handles_small_maps() {
        let device = Default::default();
        let ppm = PyramidPoolingConfig::new(12, vec![6, 3, 2, 1])
            .with_mode(PoolingMode::Adaptive)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([1, 12, 5, 5], Distribution::Default, &device);
        assert_eq!(ppm.forward(x).unwrap().dims(), [1, 24, 5, 5]);
    }

    #[test]
    fn input_is_the_leading_slice() {
        let device = Default::default();
        let ppm = PyramidPoolingConfig::new(4, vec![2])
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::<TestBackend, 4>::random([1, 4, 6, 6], Distribution::Default, &device);
        let y = ppm.forward(x.clone()).unwrap();

        y.slice([0..1, 0..4, 0..6, 0..6])
            .into_data()
            .assert_eq(&x.into_data(), true);
    }

    #[test]
    fn uneven_split_truncates_branch_channels() {
        let config = PyramidPoolingConfig::new(10, vec![1, 2, 3]);
        assert_eq!(config.branch_channels(), 3);
        assert_eq!(config.out_channels(), 19);
    }

    #[test]
    fn kernel_larger_than_map_is_an_error() {
        let device = Default::default();
        let ppm = PyramidPoolingConfig::new(8, vec![1, 6])
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([1, 8, 4, 8], Distribution::Default, &device);
        match ppm.forward(x) {
            Err(SemSegError::InvalidTensorShape { expected, actual }) => {
                assert!(expected.contains("6x6"));
                assert_eq!(actual, "4x8");
            }
            _ => panic!("Expected InvalidTensorShape error"),
        }
    }

    #[test]
    fn empty_pool_sizes_is_rejected() {
        let device = Default::default();
        let result = PyramidPoolingConfig::new(8, vec![]).init::<TestBackend>(&device);

        match result {
            Err(SemSegError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("must not be empty"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn more_branches_than_channels_is_rejected() {
        let device = Default::default();
        let result = PyramidPoolingConfig::new(2, vec![1, 2, 3]).init::<TestBackend>(&device);
        assert!(result.is_err());
    }
}
