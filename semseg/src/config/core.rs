use burn::prelude::*;

use super::enums::Architecture;
use crate::error::{invalid_config, SemSegResult};

/// Architecture-agnostic description of a segmentation network.
///
/// Per-architecture knobs (block counts, pool sizes, ...) keep their reference
/// values; use the dedicated configs in [`crate::models`] to change them.
#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = "Architecture::UNet")]
    pub architecture: Architecture,
    /// Number of output classes (logit channels).
    #[config(default = "21")]
    pub n_classes: usize,
    /// Number of channels of the input image.
    #[config(default = "3")]
    pub in_channels: usize,
    /// Divisor for the reference filter widths. `None` picks the architecture default.
    #[config(default = "None")]
    pub feature_scale: Option<usize>,
}

impl ModelConfig {
    /// The feature scale that will actually be used.
    #[must_use]
    pub fn effective_feature_scale(&self) -> usize {
        self.feature_scale
            .unwrap_or_else(|| self.architecture.default_feature_scale())
    }

    /// Validates the configuration for logical consistency.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SemSegError::InvalidConfiguration`] if a field is out of range.
    pub fn validate(&self) -> SemSegResult<()> {
        if self.n_classes == 0 {
            return Err(invalid_config("n_classes must be at least 1"));
        }
        if self.in_channels == 0 {
            return Err(invalid_config("in_channels must be at least 1"));
        }

        // Every reference width is a multiple of 32, so the scale has to divide it.
        let scale = self.effective_feature_scale();
        if scale == 0 || 32 % scale != 0 {
            return Err(invalid_config(format!(
                "feature_scale must divide 32, got {scale}"
            )));
        }

        Ok(())
    }
}
