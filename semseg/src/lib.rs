//! # semseg-burn
//!
//! Semantic segmentation building blocks and reference networks for the Burn
//! deep learning framework.
//!
//! The [`models::modules`] layer holds the reusable blocks: fused
//! convolution/normalization units, U-Net and SegNet stages, residual and
//! dilated bottleneck blocks, pyramid pooling and LinkNet decoder stages. The
//! [`models`] layer assembles them into UNet, SegNet, PSPNet and LinkNet, and
//! [`ModelConfig`] builds any of them by name.
//!
//! ```no_run
//! use burn::{backend::NdArray, prelude::*};
//! use semseg_burn::{Architecture, ModelConfig};
//!
//! let device = Default::default();
//! let model = ModelConfig::new()
//!     .with_architecture(Architecture::SegNet)
//!     .with_n_classes(12)
//!     .init::<NdArray>(&device)?;
//! let logits = model.forward(Tensor::zeros([1, 3, 224, 224], &device))?;
//! assert_eq!(logits.dims(), [1, 12, 224, 224]);
//! # Ok::<(), semseg_burn::SemSegError>(())
//! ```

mod config;
mod error;
pub mod models;


pub use config::{Architecture, ModelConfig, PoolingMode};
pub use error::{SemSegError, SemSegResult};
pub use models::{
    modules, LinkNet, LinkNetConfig, PspNet, PspNetConfig, PspNetOutput, SegNet, SegNetConfig,
    SegmentationModel, UNet, UNetConfig,
};
