//! Chain identifiers.
//!
//! - [`ChainId`] - A CAIP-2 compliant chain identifier (e.g., `eip155:80002` for Polygon Amoy)

mod chain_id;

pub use chain_id::*;
