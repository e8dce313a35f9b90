//! Additional operations for the Burn deep learning framework
//!
//! This crate provides operations used by lightweight segmentation networks that
//! are not available in the core Burn framework.

use burn::prelude::*;

mod inventory;
mod shuffle;
mod upsample;

pub use inventory::{ShapeInventory, ShapeMismatch};
pub use shuffle::channel_shuffle;
pub use upsample::upsample_bilinear;

/// Additional operations for Burn image tensors
pub trait TensorExtraOps<B: Backend> {
    /// Interleave `groups` channel groups.
    fn channel_shuffle(self, groups: usize) -> Self;

    /// Half-pixel bilinear upsampling by an integer factor.
    fn upsample_bilinear(self, scale: usize) -> Self;
}

impl<B: Backend> TensorExtraOps<B> for Tensor<B, 4> {
    fn channel_shuffle(self, groups: usize) -> Self {
        channel_shuffle(self, groups)
    }

    fn upsample_bilinear(self, scale: usize) -> Self {
        upsample_bilinear(self, scale)
    }
}
