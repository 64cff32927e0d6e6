//! EVM chain plumbing for the Diamond.
//!
//! - [`Eip155ChainConfig`] - chain, endpoints, contract address and signer settings
//! - [`ProviderResolver`] / [`CachedResolver`] - ordered selection of a live RPC endpoint
//! - [`Eip155ChainReference`], [`EvmPrivateKey`] - small EVM value types

pub mod config;
pub mod resolver;
pub mod types;

pub use config::*;
pub use resolver::*;
pub use types::*;
