#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types shared by the ration distribution gateway crates.
//!
//! This crate is chain-implementation agnostic. It carries the identifiers and
//! configuration primitives that both the EVM chain crate and the login crate
//! speak in, without pulling in any RPC machinery.
//!
//! # Modules
//!
//! - [`chain`] - CAIP-2 chain identifiers
//! - [`config`] - RPC endpoint configuration and environment variable resolution
//! - [`networks`] - Registry of the networks the distribution contract is deployed on
//! - [`wallet`] - Validated wallet addresses as entered by users

pub mod chain;
pub mod config;
pub mod networks;
pub mod wallet;
