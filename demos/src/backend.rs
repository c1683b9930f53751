//! Compile-time backend choice for the demos.
//!
//! The first enabled feature out of `cuda`, `wgpu` and `ndarray` wins. Every
//! backend is also available wrapped in [`Autodiff`] so the demos can run a
//! backward pass through the same networks.

use burn::{backend::Autodiff, prelude::Backend};
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        /// Inference backend picked by cargo feature.
        pub type SelectedBackend = burn::backend::Cuda;
        pub const BACKEND_NAME: &str = "cuda";
    } else if #[cfg(feature = "wgpu")] {
        /// Inference backend picked by cargo feature.
        pub type SelectedBackend = burn::backend::Wgpu;
        pub const BACKEND_NAME: &str = "wgpu";
    } else {
        /// Inference backend picked by cargo feature.
        pub type SelectedBackend = burn::backend::NdArray;
        pub const BACKEND_NAME: &str = "ndarray";
    }
}

/// [`SelectedBackend`] with gradient tracking.
pub type SelectedAutodiffBackend = Autodiff<SelectedBackend>;

/// Device shared by the plain and autodiff backends.
pub type SelectedDevice = <SelectedBackend as Backend>::Device;

/// Default device of the selected backend.
pub fn create_device() -> SelectedDevice {
    SelectedDevice::default()
}
