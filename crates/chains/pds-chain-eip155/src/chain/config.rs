use alloy_primitives::{Address, address};
use pds_types::chain::ChainId;
use pds_types::config::{LiteralOrEnv, RpcConfig};
use pds_types::networks::{self, NetworkInfo};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::abi::MergeOptions;
use crate::chain::{Eip155ChainReference, Eip155ChainReferenceFormatError, EvmPrivateKey};

/// Where the ration Diamond is deployed on Polygon Amoy.
pub const DEFAULT_DIAMOND_ADDRESS: Address = address!("0x3329CA690f619bae73b9f36eb43839892D20045f");

/// Chain and contract settings for the Diamond.
///
/// Deserialized from the `chain` section of the gateway config:
///
/// ```json
/// {
///   "network": "eip155:80002",
///   "rpc": [{ "http": "https://rpc-amoy.polygon.technology/" }],
///   "env_rpc_var": "RPC_URL",
///   "contract": "$CONTRACT_ADDRESS",
///   "signer": "$ADMIN_PRIVATE_KEY"
/// }
/// ```
///
/// Every field is optional. When `rpc` is omitted the public endpoints of a
/// known network are used.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Eip155ChainConfigInner")]
pub struct Eip155ChainConfig {
    chain_reference: Eip155ChainReference,
    inner: Eip155ChainConfigInner,
}

impl Eip155ChainConfig {
    pub fn chain_reference(&self) -> Eip155ChainReference {
        self.chain_reference
    }
    pub fn chain_id(&self) -> ChainId {
        self.chain_reference.into()
    }
    pub fn rpc(&self) -> &[RpcConfig] {
        &self.inner.rpc
    }
    pub fn env_rpc_var(&self) -> &str {
        &self.inner.env_rpc_var
    }
    pub fn probe_timeout(&self) -> Option<Duration> {
        self.inner.probe_timeout_secs.map(Duration::from_secs)
    }
    pub fn provider_cache_ttl(&self) -> Option<Duration> {
        self.inner.provider_cache_ttl_secs.map(Duration::from_secs)
    }
    pub fn contract(&self) -> Address {
        *self.inner.contract.inner()
    }
    pub fn abi_path(&self) -> &Path {
        &self.inner.abi_path
    }
    pub fn merge_options(&self) -> MergeOptions {
        if self.inner.legacy_event_dedup {
            MergeOptions::legacy()
        } else {
            MergeOptions::default()
        }
    }
    pub fn signer(&self) -> Option<&EvmPrivateKey> {
        self.inner.signer.as_ref().map(|s| s.inner())
    }
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.receipt_timeout_secs)
    }
}

impl Default for Eip155ChainConfig {
    fn default() -> Self {
        let network = networks::POLYGON_AMOY;
        Self {
            chain_reference: Eip155ChainReference::new(network.eip155_id),
            inner: Eip155ChainConfigInner {
                network: network.chain_id(),
                rpc: public_rpc(&network),
                env_rpc_var: defaults::env_rpc_var(),
                probe_timeout_secs: None,
                provider_cache_ttl_secs: None,
                contract: defaults::contract(),
                abi_path: defaults::abi_path(),
                legacy_event_dedup: false,
                signer: None,
                receipt_timeout_secs: defaults::receipt_timeout_secs(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Eip155ChainConfigInner {
    /// CAIP-2 id of the chain the Diamond lives on.
    #[serde(default = "defaults::network")]
    pub network: ChainId,
    /// Ordered candidate endpoints. Defaults to the network's public endpoints.
    #[serde(default)]
    pub rpc: Vec<RpcConfig>,
    /// Environment variable holding the operator's own endpoint, tried last.
    #[serde(default = "defaults::env_rpc_var")]
    pub env_rpc_var: String,
    /// Upper bound on a single liveness probe. Unbounded when absent.
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
    /// Memoize the working provider for this long. Every request resolves anew when absent.
    #[serde(default)]
    pub provider_cache_ttl_secs: Option<u64>,
    #[serde(default = "defaults::contract")]
    pub contract: LiteralOrEnv<Address>,
    /// Merged or per-facet ABI document.
    #[serde(default = "defaults::abi_path")]
    pub abi_path: PathBuf,
    /// Collapse events and errors to one entry each when merging.
    #[serde(default)]
    pub legacy_event_dedup: bool,
    /// Private key for admin writes. Reads only when absent.
    #[serde(default)]
    pub signer: Option<LiteralOrEnv<EvmPrivateKey>>,
    #[serde(default = "defaults::receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

impl TryFrom<Eip155ChainConfigInner> for Eip155ChainConfig {
    type Error = Eip155ChainReferenceFormatError;

    fn try_from(mut inner: Eip155ChainConfigInner) -> Result<Self, Self::Error> {
        let chain_reference = Eip155ChainReference::try_from(&inner.network)?;
        if inner.rpc.is_empty() {
            if let Some(network) = networks::network_by_eip155_id(chain_reference.inner()) {
                inner.rpc = public_rpc(network);
            }
        }
        Ok(Self {
            chain_reference,
            inner,
        })
    }
}

fn public_rpc(network: &NetworkInfo) -> Vec<RpcConfig> {
    network
        .public_rpc
        .iter()
        .filter_map(|url| url.parse().ok())
        .collect()
}

mod defaults {
    use super::*;

    pub fn network() -> ChainId {
        networks::POLYGON_AMOY.chain_id()
    }
    pub fn env_rpc_var() -> String {
        "RPC_URL".to_string()
    }
    pub fn contract() -> LiteralOrEnv<Address> {
        LiteralOrEnv::from_literal(DEFAULT_DIAMOND_ADDRESS)
    }
    pub fn abi_path() -> PathBuf {
        PathBuf::from("abis/DiamondMergedABI.json")
    }
    pub fn receipt_timeout_secs() -> u64 {
        30
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_section_targets_amoy() {
        let config: Eip155ChainConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.chain_reference().inner(), 80002);
        assert_eq!(config.rpc().len(), 2);
        assert_eq!(config.env_rpc_var(), "RPC_URL");
        assert_eq!(config.contract(), DEFAULT_DIAMOND_ADDRESS);
        assert!(config.probe_timeout().is_none());
        assert!(config.signer().is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config: Eip155ChainConfig = serde_json::from_value(json!({
            "network": "eip155:137",
            "rpc": [{ "http": "http://localhost:8545", "rate_limit": 5 }],
            "probe_timeout_secs": 3,
            "legacy_event_dedup": true
        }))
        .unwrap();
        assert_eq!(config.chain_id().to_string(), "eip155:137");
        assert_eq!(config.rpc()[0].rate_limit, Some(5));
        assert_eq!(config.probe_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.merge_options().non_function_key, crate::abi::NonFunctionKey::ByType);
    }

    #[test]
    fn non_evm_network_is_rejected() {
        let result: Result<Eip155ChainConfig, _> =
            serde_json::from_value(json!({ "network": "solana:mainnet" }));
        assert!(result.is_err());
    }
}
