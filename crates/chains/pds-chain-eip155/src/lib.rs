//! EVM support for the ration distribution Diamond.
//!
//! - [`abi`] flattens per-facet ABIs into one de-duplicated ABI.
//! - [`chain`] holds the chain configuration and the ordered RPC resolver.
//! - [`contract`] binds the merged ABI to the Diamond, read-only or signer-bound.
//! - [`values`] renders decoded return values as JSON.
//!
//! ```no_run
//! use pds_chain_eip155::abi::merge_abi_file;
//! use pds_chain_eip155::chain::{Eip155ChainConfig, ProviderResolver};
//! use pds_chain_eip155::contract::DiamondContract;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Eip155ChainConfig::default();
//! let abi = merge_abi_file(config.abi_path(), config.merge_options())?.to_json_abi()?;
//! let provider = ProviderResolver::from_config(&config).resolve().await?.client;
//! let diamond = DiamondContract::read_only(config.contract(), abi, &provider);
//! let dashboard = diamond.call_str("getDashboardData", &[]).await?;
//! println!("{}", dashboard.to_json());
//! # Ok(())
//! # }
//! ```

pub mod abi;
pub mod chain;
pub mod contract;
pub mod values;
