//! Additional operations for the Burn deep learning framework
//!
//! This crate provides operations that encoder/decoder segmentation networks need
//! but that are not yet available in the core Burn framework.

use burn::prelude::*;

mod unpool;

pub use unpool::{
    max_pool2d_indexed, max_unpool2d, MaxPool2dIndexed, MaxPool2dIndexedConfig, MaxPoolOutput,
    MaxUnpool2d, MaxUnpool2dConfig,
};

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend> {
    /// Max-pool over non-overlapping windows and keep the argmax positions.
    fn max_pool2d_indexed(self, kernel_size: [usize; 2]) -> MaxPoolOutput<B>;

    /// Put values back at the positions recorded by [`TensorExtraOps::max_pool2d_indexed`].
    fn max_unpool2d(
        self,
        indices: Tensor<B, 4, Int>,
        kernel_size: [usize; 2],
        output_size: [usize; 2],
    ) -> Self;
}

impl<B: Backend> TensorExtraOps<B> for Tensor<B, 4> {
    fn max_pool2d_indexed(self, kernel_size: [usize; 2]) -> MaxPoolOutput<B> {
        max_pool2d_indexed(self, kernel_size)
    }

    fn max_unpool2d(
        self,
        indices: Tensor<B, 4, Int>,
        kernel_size: [usize; 2],
        output_size: [usize; 2],
    ) -> Self {
        max_unpool2d(self, indices, kernel_size, output_size)
    }
}
