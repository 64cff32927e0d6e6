//! Gateway for the ration distribution system.
//!
//! Ties the workspace crates into one process:
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cli`] | Command line of the `pds` binary |
//! | [`config`] | Configuration file and defaults |
//! | [`diamond`] | Merged ABI plus provider resolution for the Diamond deployment |
//! | [`onchain`] | Membership checks answered by Diamond getters |
//! | [`handlers`] | HTTP endpoints: health, ABI, login, logout, session, calls |
//! | [`run`] | Startup and subcommand dispatch |
//!
//! # Running
//!
//! ```bash
//! # HTTP gateway on $HOST:$PORT (default 0.0.0.0:8080)
//! pds --config config.json serve
//!
//! # Classify a wallet from the terminal
//! pds login 0x37470c74Cc2Cb55AB1CC23b16a05F2DC657E25aa
//!
//! # Regenerate the merged ABI
//! pds merge-abi --output abis/DiamondMergedABI.json
//! ```
//!
//! Environment: `.env` is loaded at startup; `RPC_URL` adds an operator RPC
//! endpoint after the public ones; `RUST_LOG` sets the log filter.

pub mod cli;
pub mod config;
pub mod diamond;
pub mod handlers;
pub mod onchain;
pub mod run;
pub mod sig_down;
pub mod telemetry;
