//! Enumeration types for model configuration.

use core::str::FromStr;

use burn::prelude::*;

use crate::error::SemSegError;

/// The segmentation network to assemble.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum Architecture {
    /// U-Net with valid convolutions and transposed-convolution upsampling.
    UNet,
    /// SegNet with index-tracked pooling and unpooling.
    SegNet,
    /// PSPNet on a dilated residual trunk.
    PspNet,
    /// LinkNet with additive encoder skips.
    LinkNet,
}

impl Architecture {
    /// All supported architectures, in declaration order.
    pub const ALL: [Self; 4] = [Self::UNet, Self::SegNet, Self::PspNet, Self::LinkNet];

    /// Lower-case identifier used on the command line and in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UNet => "unet",
            Self::SegNet => "segnet",
            Self::PspNet => "pspnet",
            Self::LinkNet => "linknet",
        }
    }

    /// Divisor applied to the reference filter widths when none is configured.
    #[must_use]
    pub const fn default_feature_scale(&self) -> usize {
        match self {
            Self::UNet | Self::LinkNet => 4,
            Self::SegNet | Self::PspNet => 1,
        }
    }
}

impl FromStr for Architecture {
    type Err = SemSegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "unet" => Ok(Self::UNet),
            "segnet" => Ok(Self::SegNet),
            "pspnet" | "psp" => Ok(Self::PspNet),
            "linknet" => Ok(Self::LinkNet),
            _ => Err(SemSegError::UnsupportedArchitecture {
                name: s.to_string(),
            }),
        }
    }
}

/// How the pyramid pooling module reduces each branch.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum PoolingMode {
    /// Average pooling with a `k x k` window and stride 1.
    Kernel,
    /// Adaptive average pooling to a `k x k` grid of bins.
    Adaptive,
}
