//! semseg-burn demos
//!
//! ## Available Demos
//!
//! - `shapes`: build a segmentation network and trace a batch through it
//!
//! ## Usage
//!
//! ```bash
//! # Run a SegNet pass on a 224x224 batch
//! cargo run --bin shapes -- forward --architecture segnet --size 224
//!
//! # Build from a saved model config
//! cargo run --bin shapes -- forward --config model.json
//!
//! # Also backpropagate through the network
//! cargo run --bin shapes -- forward --architecture linknet --size 224 --backward
//!
//! # List architectures and the selected backend
//! cargo run --bin shapes -- info
//! ```

pub mod backend;
pub mod report;

pub use backend::{
    create_device, SelectedAutodiffBackend, SelectedBackend, SelectedDevice, BACKEND_NAME,
};
pub use report::{run_backward, run_forward, ShapeReport};
