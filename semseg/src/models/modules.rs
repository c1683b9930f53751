mod conv_units;
mod linknet_blocks;
mod pyramid_pooling;
mod residual;
mod segnet_blocks;
mod unet_blocks;

pub use conv_units::*;
pub use linknet_blocks::*;
pub use pyramid_pooling::*;
pub use residual::*;
pub use segnet_blocks::*;
pub use unet_blocks::*;
