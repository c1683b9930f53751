//! # Index-tracked max pooling and max unpooling
//!
//! Encoder/decoder networks such as SegNet need both halves: the encoder
//! records where each window maximum came from, and the decoder writes values
//! back to exactly those positions in a zero-filled map of the pre-pool size.
//!
//! Windows never overlap: the stride always equals the window, so every input
//! pixel belongs to at most one window and unpooling assigns rather than adds.
//! Trailing rows and columns that do not fill a window are dropped by the pool
//! and come back as zeros.
//!
//! Indices follow the PyTorch convention: each entry is the flat position
//! `row * width + col` inside its own `H x W` input plane. They are computed
//! here from the in-window argmax, so they do not depend on how a backend
//! encodes its own pooling indices.
//!
//! Unpooling is a broadcast multiply of the pooled values with a one-hot
//! window mask, which keeps it differentiable on every autodiff backend.

use burn::prelude::*;

/// Result of an index-tracked max pooling pass.
#[derive(Debug, Clone)]
pub struct MaxPoolOutput<B: Backend> {
    /// The pooled feature map.
    pub output: Tensor<B, 4>,
    /// Flat in-plane positions of each window maximum, same shape as `output`.
    pub indices: Tensor<B, 4, Int>,
    /// Pooling window, which is also the stride.
    pub kernel_size: [usize; 2],
    /// Shape of the tensor before pooling, used to restore odd spatial sizes.
    pub input_shape: [usize; 4],
}

impl<B: Backend> MaxPoolOutput<B> {
    /// Spatial size `[height, width]` of the pre-pool tensor.
    pub const fn unpool_size(&self) -> [usize; 2] {
        [self.input_shape[2], self.input_shape[3]]
    }
}

fn assert_kernel(kernel_size: [usize; 2]) {
    assert!(
        kernel_size[0] > 0 && kernel_size[1] > 0,
        "pooling window must be non-zero, got {kernel_size:?}"
    );
}

/// Top-left corner `(row, col)` of every window, broadcast to `[batch, channels, oh, ow]`.
fn window_origins<B: Backend>(
    shape: [usize; 4],
    kernel_size: [usize; 2],
    device: &B::Device,
) -> (Tensor<B, 4, Int>, Tensor<B, 4, Int>) {
    let [_, _, out_h, out_w] = shape;
    let [kernel_h, kernel_w] = kernel_size;

    let rows = Tensor::<B, 1, Int>::arange(0..out_h as i64, device)
        .mul_scalar(kernel_h as i64)
        .reshape([1, 1, out_h, 1])
        .expand(shape);
    let cols = Tensor::<B, 1, Int>::arange(0..out_w as i64, device)
        .mul_scalar(kernel_w as i64)
        .reshape([1, 1, 1, out_w])
        .expand(shape);

    (rows, cols)
}

/// Max pooling with a `kernel_size` window and equal stride that also returns
/// the argmax positions.
///
/// # Panics
///
/// Panics if either window dimension is zero.
pub fn max_pool2d_indexed<B: Backend>(
    x: Tensor<B, 4>,
    kernel_size: [usize; 2],
) -> MaxPoolOutput<B> {
    assert_kernel(kernel_size);
    let input_shape = x.dims();
    let [batch, channels, height, width] = input_shape;
    let [kernel_h, kernel_w] = kernel_size;
    let (out_h, out_w) = (height / kernel_h, width / kernel_w);
    let device = x.device();

    // [b, c, oh, kh, ow, kw] -> [b, c, oh, ow, kh * kw]
    let windows = x
        .slice([0..batch, 0..channels, 0..out_h * kernel_h, 0..out_w * kernel_w])
        .reshape([batch, channels, out_h, kernel_h, out_w, kernel_w])
        .swap_dims(3, 4)
        .reshape([batch, channels, out_h, out_w, kernel_h * kernel_w]);

    let (output, local) = windows.max_dim_with_indices(4);
    let output = output.reshape([batch, channels, out_h, out_w]);
    let local = local.reshape([batch, channels, out_h, out_w]);

    let row_offset = local.clone().div_scalar(kernel_w as i64);
    let col_offset = local - row_offset.clone().mul_scalar(kernel_w as i64);
    let (rows, cols) = window_origins::<B>([batch, channels, out_h, out_w], kernel_size, &device);
    let indices = (rows + row_offset).mul_scalar(width as i64) + cols + col_offset;

    MaxPoolOutput {
        output,
        indices,
        kernel_size,
        input_shape,
    }
}

/// Writes every value of `x` to the position recorded in `indices`.
///
/// `kernel_size` must be the window used by [`max_pool2d_indexed`]. The result
/// has shape `[batch, channels, output_size[0], output_size[1]]`; positions that
/// were not selected by the pooling pass are zero.
///
/// # Panics
///
/// Panics if `x` and `indices` do not have the same shape, if the window is
/// zero, or if `output_size` cannot hold the pooled windows.
pub fn max_unpool2d<B: Backend>(
    x: Tensor<B, 4>,
    indices: Tensor<B, 4, Int>,
    kernel_size: [usize; 2],
    output_size: [usize; 2],
) -> Tensor<B, 4> {
    assert_kernel(kernel_size);
    let [batch, channels, out_h, out_w] = x.dims();
    assert_eq!(
        indices.dims(),
        [batch, channels, out_h, out_w],
        "unpool indices must match the pooled tensor shape"
    );
    let [kernel_h, kernel_w] = kernel_size;
    let [height, width] = output_size;
    let (covered_h, covered_w) = (out_h * kernel_h, out_w * kernel_w);
    assert!(
        covered_h <= height && covered_w <= width,
        "unpool output size {output_size:?} is smaller than the pooled windows {covered_h}x{covered_w}"
    );
    let device = x.device();
    let window_len = kernel_h * kernel_w;

    // Flat plane index -> position inside its window.
    let row = indices.clone().div_scalar(width as i64);
    let col = indices - row.clone().mul_scalar(width as i64);
    let (rows, cols) = window_origins::<B>([batch, channels, out_h, out_w], kernel_size, &device);
    let local = (row - rows).mul_scalar(kernel_w as i64) + (col - cols);

    let mask_shape = [batch, channels, out_h, out_w, window_len];
    let slots = Tensor::<B, 1, Int>::arange(0..window_len as i64, &device)
        .reshape([1, 1, 1, 1, window_len])
        .expand(mask_shape);
    let mask = local
        .reshape([batch, channels, out_h, out_w, 1])
        .expand(mask_shape)
        .equal(slots)
        .float();

    // [b, c, oh, ow, kh * kw] -> [b, c, oh * kh, ow * kw]
    let x = (x.reshape([batch, channels, out_h, out_w, 1]).expand(mask_shape) * mask)
        .reshape([batch, channels, out_h, out_w, kernel_h, kernel_w])
        .swap_dims(3, 4)
        .reshape([batch, channels, covered_h, covered_w]);

    let x = if covered_w < width {
        let pad = Tensor::zeros([batch, channels, covered_h, width - covered_w], &device);
        Tensor::cat(vec![x, pad], 3)
    } else {
        x
    };
    if covered_h < height {
        let pad = Tensor::zeros([batch, channels, height - covered_h, width], &device);
        Tensor::cat(vec![x, pad], 2)
    } else {
        x
    }
}

/// Configuration for [`MaxPool2dIndexed`].
#[derive(Config, Debug)]
pub struct MaxPool2dIndexedConfig {
    /// Pooling window, also used as the stride.
    #[config(default = "[2, 2]")]
    pub kernel_size: [usize; 2],
}

impl MaxPool2dIndexedConfig {
    /// # Panics
    ///
    /// Panics if either window dimension is zero.
    pub fn init(&self) -> MaxPool2dIndexed {
        assert_kernel(self.kernel_size);
        MaxPool2dIndexed {
            kernel_size: self.kernel_size,
        }
    }
}

/// Max pooling layer that keeps the winner positions for a later [`MaxUnpool2d`].
#[derive(Module, Clone, Debug)]
pub struct MaxPool2dIndexed {
    kernel_size: [usize; 2],
}

impl MaxPool2dIndexed {
    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> MaxPoolOutput<B> {
        max_pool2d_indexed(x, self.kernel_size)
    }
}

/// Configuration for [`MaxUnpool2d`].
#[derive(Config, Debug)]
pub struct MaxUnpool2dConfig {
    /// Window of the matching [`MaxPool2dIndexed`].
    #[config(default = "[2, 2]")]
    pub kernel_size: [usize; 2],
}

impl MaxUnpool2dConfig {
    /// # Panics
    ///
    /// Panics if either window dimension is zero.
    pub fn init(&self) -> MaxUnpool2d {
        assert_kernel(self.kernel_size);
        MaxUnpool2d {
            kernel_size: self.kernel_size,
        }
    }
}

/// Inverse of [`MaxPool2dIndexed`]. Holds no parameters.
#[derive(Module, Clone, Debug)]
pub struct MaxUnpool2d {
    kernel_size: [usize; 2],
}

impl MaxUnpool2d {
    /// # Shapes
    /// - x: `[batch, channels, h, w]`
    /// - indices: `[batch, channels, h, w]`
    /// - output: `[batch, channels, output_size[0], output_size[1]]`
    pub fn forward<B: Backend>(
        &self,
        x: Tensor<B, 4>,
        indices: Tensor<B, 4, Int>,
        output_size: [usize; 2],
    ) -> Tensor<B, 4> {
        max_unpool2d(x, indices, self.kernel_size, output_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::{Distribution, TensorData, Tolerance},
    };

    type TestBackend = NdArray<f32>;

    fn assert_values(actual: Tensor<TestBackend, 4>, expected: TensorData) {
        actual
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn pool_records_argmax_positions() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats(
            [[[
                [1.0, 5.0, 2.0, 0.0],
                [3.0, 4.0, 8.0, 1.0],
                [0.0, 0.0, 1.0, 1.0],
                [9.0, 2.0, 3.0, 7.0],
            ]]],
            &device,
        );

        let pooled = max_pool2d_indexed(x, [2, 2]);

        assert_eq!(pooled.input_shape, [1, 1, 4, 4]);
        assert_eq!(pooled.unpool_size(), [4, 4]);
        assert_values(
            pooled.output,
            TensorData::from([[[[5.0f32, 8.0], [9.0, 7.0]]]]),
        );
        let indices = pooled.indices.into_data().to_vec::<i64>().unwrap();
        assert_eq!(indices, vec![1, 6, 12, 15]);
    }

    #[test]
    fn unpool_places_maxima_back_in_place() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats(
            [[[
                [1.0, 5.0, 2.0, 0.0],
                [3.0, 4.0, 8.0, 1.0],
                [0.0, 0.0, 1.0, 1.0],
                [9.0, 2.0, 3.0, 7.0],
            ]]],
            &device,
        );

        let pooled = MaxPool2dIndexedConfig::new().init().forward(x);
        let size = pooled.unpool_size();
        let restored = MaxUnpool2dConfig::new()
            .init()
            .forward(pooled.output, pooled.indices, size);

        assert_values(
            restored,
            TensorData::from([[[
                [0.0f32, 5.0, 0.0, 0.0],
                [0.0, 0.0, 8.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
                [9.0, 0.0, 0.0, 7.0],
            ]]]),
        );
    }

    #[test]
    fn wide_map_indices_use_row_width() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats(
            [[[[1.0, 0.0, 2.0, 0.0], [0.0, 5.0, 0.0, 9.0]]]],
            &device,
        );

        let pooled = max_pool2d_indexed(x, [2, 2]);
        let indices = pooled.indices.clone().into_data().to_vec::<i64>().unwrap();
        assert_eq!(indices, vec![5, 7]);

        let restored = max_unpool2d(pooled.output, pooled.indices, [2, 2], [2, 4]);
        assert_values(
            restored,
            TensorData::from([[[[0.0f32, 0.0, 0.0, 0.0], [0.0, 5.0, 0.0, 9.0]]]]),
        );
    }

    #[test]
    fn tall_odd_map_round_trip() {
        let device = Default::default();
        // 5x2: the last row is dropped by the pool and restored as zeros.
        let x = Tensor::<TestBackend, 4>::from_floats(
            [[[
                [0.0, 3.0],
                [1.0, 2.0],
                [6.0, 0.0],
                [4.0, 5.0],
                [9.0, 9.0],
            ]]],
            &device,
        );

        let pooled = max_pool2d_indexed(x, [2, 2]);
        assert_eq!(pooled.output.dims(), [1, 1, 2, 1]);
        let indices = pooled.indices.clone().into_data().to_vec::<i64>().unwrap();
        assert_eq!(indices, vec![1, 4]);

        let size = pooled.unpool_size();
        let restored = max_unpool2d(pooled.output, pooled.indices, [2, 2], size);
        assert_values(
            restored,
            TensorData::from([[[
                [0.0f32, 3.0],
                [0.0, 0.0],
                [6.0, 0.0],
                [0.0, 0.0],
                [0.0, 0.0],
            ]]]),
        );
    }

    #[test]
    fn non_square_window_on_a_row() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0, 9.0, 3.0, 4.0]]]], &device);

        let pooled = max_pool2d_indexed(x, [1, 2]);
        let indices = pooled.indices.clone().into_data().to_vec::<i64>().unwrap();
        assert_eq!(indices, vec![1, 2]);

        // Each winner is written once, and the unpaired last column stays zero.
        let restored = max_unpool2d(pooled.output, pooled.indices, [1, 2], [1, 5]);
        assert_values(
            restored,
            TensorData::from([[[[0.0f32, 2.0, 9.0, 0.0, 0.0]]]]),
        );
    }

    #[test]
    fn unpool_restores_odd_spatial_size() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 7, 5], Distribution::Default, &device);

        let pooled = max_pool2d_indexed(x.clone(), [2, 2]);
        assert_eq!(pooled.output.dims(), [2, 3, 3, 2]);

        let size = pooled.unpool_size();
        let restored = max_unpool2d(pooled.output.clone(), pooled.indices, [2, 2], size);
        assert_eq!(restored.dims(), [2, 3, 7, 5]);

        // Every pooled maximum survives and nothing else is added.
        let pooled_sum = pooled.output.sum().into_scalar();
        let restored_sum = restored.clone().sum().into_scalar();
        assert!((pooled_sum - restored_sum).abs() < 1e-4);

        // Every output pixel is either zero or the input value at that pixel.
        let misplaced = (restored.clone() * (restored - x)).abs().sum().into_scalar();
        assert!(misplaced < 1e-6);
    }

    #[test]
    fn unpool_is_differentiable() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();
        let x = Tensor::<AutodiffBackend, 4>::random([1, 2, 4, 6], Distribution::Default, &device)
            .require_grad();

        let pooled = max_pool2d_indexed(x.clone(), [2, 2]);
        let size = pooled.unpool_size();
        let grads = max_unpool2d(pooled.output, pooled.indices, [2, 2], size)
            .sum()
            .backward();

        let grad = x.grad(&grads).expect("input gradient");
        assert_eq!(grad.dims(), [1, 2, 4, 6]);
        // One winner per 2x2 window receives gradient 1.
        let total = grad.sum().into_scalar();
        assert!((total - 12.0).abs() < 1e-4);
    }

    #[test]
    #[should_panic(expected = "unpool indices must match")]
    fn unpool_rejects_mismatched_indices() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);
        let indices = Tensor::<TestBackend, 4, Int>::zeros([1, 1, 3, 3], &device);

        let _ = max_unpool2d(x, indices, [2, 2], [4, 4]);
    }

    #[test]
    #[should_panic(expected = "pooling window must be non-zero")]
    fn zero_window_is_rejected() {
        let _ = MaxPool2dIndexedConfig::new().with_kernel_size([0, 2]).init();
    }
}
