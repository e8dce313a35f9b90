//! # Model Architectures
//!
//! - `shuffle_seg`: the top-level network, backbone plus decoder.
//! - `decoder`: the top-down fusion decoder and its prediction heads.
//! - `refinement`: the multi-scale refinement unit used by the decoder.
//! - `modules`: the convolution blocks the decoder is made of.

pub mod decoder;
pub mod modules;
pub mod refinement;
pub mod shuffle_seg;

#[cfg(test)]
mod test_weights;
