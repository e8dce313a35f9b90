mod conv_blocks;

pub use conv_blocks::*;
