//! # Channel Shuffle
//!
//! Interleaves channel groups so that grouped or split convolution paths can
//! exchange information without extra parameters.

use burn::prelude::*;

/// Shuffles the channel axis of a `[N, C, H, W]` tensor.
///
/// The channel axis is viewed as `[groups, C / groups]`, the two logical axes are
/// transposed and flattened back. With `groups = 2` and eight channels the output
/// order is `[0, 4, 1, 5, 2, 6, 3, 7]`.
///
/// # Panics
///
/// Panics if `groups` is zero or does not divide the channel count.
pub fn channel_shuffle<B: Backend>(x: Tensor<B, 4>, groups: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    assert!(
        groups > 0 && channels % groups == 0,
        "channel count {channels} is not divisible into {groups} groups"
    );
    let channels_per_group = channels / groups;

    x.reshape([batch, groups, channels_per_group, height, width])
        .swap_dims(1, 2)
        .reshape([batch, channels, height, width])
}
