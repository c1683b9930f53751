//! Timed forward (and optionally backward) passes with a printable summary.

use std::{
    fmt,
    time::{Duration, Instant},
};

use burn::{
    optim::GradientsParams,
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use semseg_burn::{Architecture, SegmentationModel, SemSegResult};

/// Outcome of one forward pass.
#[derive(Debug, Clone)]
pub struct ShapeReport {
    pub architecture: Architecture,
    pub num_params: usize,
    pub input: [usize; 4],
    pub output: [usize; 4],
    pub elapsed: Duration,
    /// Parameters that received a gradient, for backward runs.
    pub grad_params: Option<usize>,
}

impl fmt::Display for ShapeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} params={:<10} {:?} -> {:?} in {:?}",
            self.architecture.name(), self.num_params, self.input, self.output, self.elapsed
        )?;
        if let Some(count) = self.grad_params {
            write!(f, " grads={count}")?;
        }
        Ok(())
    }
}

/// Runs `model` on a random batch of shape `input` and reports the result.
///
/// # Errors
///
/// Propagates the model's input-shape errors.
pub fn run_forward<B: Backend>(
    model: &SegmentationModel<B>,
    input: [usize; 4],
    device: &B::Device,
) -> SemSegResult<ShapeReport> {
    let x = Tensor::<B, 4>::random(input, Distribution::Default, device);

    let start = Instant::now();
    let y = model.forward(x)?;
    let output = y.dims();
    let elapsed = start.elapsed();

    tracing::debug!(?input, ?output, ?elapsed, "forward pass finished");

    Ok(ShapeReport {
        architecture: model.architecture(),
        num_params: model.num_params(),
        input,
        output,
        elapsed,
        grad_params: None,
    })
}

/// Like [`run_forward`], then backpropagates the mean logit and counts the
/// parameters that received a gradient. `elapsed` covers both passes.
///
/// # Errors
///
/// Propagates the model's input-shape errors.
pub fn run_backward<B: AutodiffBackend>(
    model: &SegmentationModel<B>,
    input: [usize; 4],
    device: &B::Device,
) -> SemSegResult<ShapeReport> {
    let x = Tensor::<B, 4>::random(input, Distribution::Default, device);

    let start = Instant::now();
    let y = model.forward(x)?;
    let output = y.dims();
    let grads = y.mean().backward();
    let grads = GradientsParams::from_grads(grads, model);
    let elapsed = start.elapsed();

    tracing::debug!(?input, ?output, ?elapsed, grad_params = grads.len(), "backward pass finished");

    Ok(ShapeReport {
        architecture: model.architecture(),
        num_params: model.num_params(),
        input,
        output,
        elapsed,
        grad_params: Some(grads.len()),
    })
}
