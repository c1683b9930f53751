use thiserror::Error;

/// The error type for `semseg-burn` operations.
///
/// Configuration problems are reported when a module is built; the only
/// data-dependent failure surfaced here is an input whose spatial size cannot
/// satisfy a layer's fixed window.
#[derive(Error, Debug)]
pub enum SemSegError {
    /// Error for when an architecture name cannot be resolved.
    #[error("Unsupported architecture: {name}")]
    UnsupportedArchitecture {
        /// The name that was requested.
        name: String,
    },

    /// Error for when an invalid module configuration is provided.
    /// This can happen if configuration parameters are logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when an input tensor has an invalid shape.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },
}

/// A specialized `Result` type for `semseg-burn` operations.
pub type SemSegResult<T> = Result<T, SemSegError>;

/// Shorthand for building an [`SemSegError::InvalidConfiguration`].
pub(crate) fn invalid_config(reason: impl Into<String>) -> SemSegError {
    SemSegError::InvalidConfiguration {
        reason: reason.into(),
    }
}

/// Fails with [`SemSegError::InvalidConfiguration`] when any channel count is zero.
pub(crate) fn ensure_channels(module: &str, channels: &[usize]) -> SemSegResult<()> {
    if channels.iter().any(|&c| c == 0) {
        return Err(invalid_config(format!(
            "{module}: channel counts must be non-zero, got {channels:?}"
        )));
    }
    Ok(())
}
