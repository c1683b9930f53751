//! Architecture-agnostic entry point: build any supported network from a
//! [`ModelConfig`] and run it through one `forward`.

use burn::prelude::*;

use super::{
    linknet::{LinkNet, LinkNetConfig},
    pspnet::{PspNet, PspNetConfig},
    segnet::{SegNet, SegNetConfig},
    unet::{UNet, UNetConfig},
};
use crate::{
    config::{Architecture, ModelConfig},
    error::SemSegResult,
};

/// Any of the supported segmentation networks.
#[derive(Module, Debug)]
pub enum SegmentationModel<B: Backend> {
    UNet(UNet<B>),
    SegNet(SegNet<B>),
    PspNet(PspNet<B>),
    LinkNet(LinkNet<B>),
}

impl<B: Backend> SegmentationModel<B> {
    /// Computes per-pixel class logits.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SemSegError::InvalidTensorShape`] if the input size does
    /// not suit the architecture.
    pub fn forward(&self, x: Tensor<B, 4>) -> SemSegResult<Tensor<B, 4>> {
        match self {
            Self::UNet(model) => model.forward(x),
            Self::SegNet(model) => model.forward(x),
            Self::PspNet(model) => model.forward(x),
            Self::LinkNet(model) => model.forward(x),
        }
    }

    pub const fn architecture(&self) -> Architecture {
        match self {
            Self::UNet(_) => Architecture::UNet,
            Self::SegNet(_) => Architecture::SegNet,
            Self::PspNet(_) => Architecture::PspNet,
            Self::LinkNet(_) => Architecture::LinkNet,
        }
    }
}

impl ModelConfig {
    /// Builds the configured architecture with its reference layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails [`ModelConfig::validate`] or
    /// the resulting widths are inconsistent.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SemSegResult<SegmentationModel<B>> {
        self.validate()?;
        let scale = self.effective_feature_scale();

        tracing::debug!(
            architecture = self.architecture.name(),
            n_classes = self.n_classes,
            feature_scale = scale,
            "initializing segmentation model"
        );

        let model = match self.architecture {
            Architecture::UNet => SegmentationModel::UNet(
                UNetConfig::new(self.n_classes)
                    .with_in_channels(self.in_channels)
                    .with_feature_scale(scale)
                    .init(device)?,
            ),
            Architecture::SegNet => SegmentationModel::SegNet(
                SegNetConfig::new(self.n_classes)
                    .with_in_channels(self.in_channels)
                    .with_filters([64, 128, 256, 512, 512].map(|f| f / scale))
                    .init(device)?,
            ),
            Architecture::PspNet => SegmentationModel::PspNet(
                PspNetConfig::new(self.n_classes)
                    .with_in_channels(self.in_channels)
                    .with_base_channels(64 / scale)
                    .init(device)?,
            ),
            Architecture::LinkNet => SegmentationModel::LinkNet(
                LinkNetConfig::new(self.n_classes)
                    .with_in_channels(self.in_channels)
                    .with_feature_scale(scale)
                    .init(device)?,
            ),
        };

        Ok(model)
    }
}
