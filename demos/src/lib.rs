//! ShuffleNetV2 segmentation tools
//!
//! ## Usage
//!
//! ```bash
//! # Export the x1.0 network with 4 mask classes for a 256x320 input
//! cargo run --bin export -- --preset x1.0 --mask-classes 4 --shape 1,3,256,320
//!
//! # Load a trained checkpoint first
//! cargo run --features pretrained --bin export -- --weights model.pth --mask-classes 4
//! ```

pub mod backend;

use anyhow::{bail, Context, Result};
use log::LevelFilter;

pub use backend::{
    backend_summary, create_device, get_backend_name, SelectedBackend, SelectedDevice,
};

/// Initializes `env_logger`, honouring `RUST_LOG` and falling back to
/// `default_filter`.
///
/// Returns `false` if a logger was already installed, which is left in place.
pub fn init_logging(default_filter: LevelFilter) -> bool {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    )
    .try_init()
    .is_ok()
}

/// Parses an `N,C,H,W` shape.
pub fn parse_shape(s: &str) -> Result<[usize; 4]> {
    let dims = s
        .split(',')
        .map(|dim| {
            dim.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid dimension '{dim}' in shape '{s}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    match dims.as_slice() {
        [n, c, h, w] => Ok([*n, *c, *h, *w]),
        _ => bail!("shape '{s}' must have 4 dimensions (N,C,H,W)"),
    }
}
