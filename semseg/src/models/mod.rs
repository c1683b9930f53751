//! # Model Architectures
//!
//! - `modules`: the reusable building blocks (fused conv units, U-Net, SegNet,
//!   residual, pyramid pooling and LinkNet stages).
//! - `unet`, `segnet`, `pspnet`, `linknet`: reference networks assembled from them.
//! - `segmentation`: a single enum over all networks, built from [`crate::ModelConfig`].

pub mod linknet;
pub mod modules;
pub mod pspnet;
pub mod segmentation;
pub mod segnet;
pub mod unet;

pub use linknet::{LinkNet, LinkNetConfig};
pub use pspnet::{PspNet, PspNetConfig, PspNetOutput};
pub use segmentation::SegmentationModel;
pub use segnet::{SegNet, SegNetConfig};
pub use unet::{UNet, UNetConfig};
