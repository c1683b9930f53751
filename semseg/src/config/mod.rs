//! Configuration module for the segmentation networks.
//!
//! - `core`: the architecture-agnostic [`ModelConfig`]
//! - `enums`: enumeration types used in configurations

pub mod core;
pub mod enums;

pub use self::core::ModelConfig;
pub use enums::{Architecture, PoolingMode};
