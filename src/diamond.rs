//! The gateway's handle on the Diamond deployment.
//!
//! Owns the merged ABI and the provider resolver for the configured chain.
//! Every contract binding is made against a provider that just passed (or
//! recently passed, when caching is enabled) the liveness probe.

use alloy_json_abi::JsonAbi;
use pds_chain_eip155::abi::{AbiError, MergedAbi, merge_abi_file};
use pds_chain_eip155::chain::{
    CachedResolver, Eip155ChainConfig, ProviderResolver, ResolveError, WorkingProvider,
};
use pds_chain_eip155::contract::{ContractError, DiamondContract};

#[derive(Debug, thiserror::Error)]
pub enum DiamondError {
    #[error("Failed to load Diamond ABI: {0}")]
    Abi(#[from] AbiError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("No signer configured; set chain.signer to send transactions")]
    NoSigner,
}

enum Providers {
    Fresh(ProviderResolver),
    Cached(CachedResolver),
}

pub struct Diamond {
    config: Eip155ChainConfig,
    merged: MergedAbi,
    abi: JsonAbi,
    providers: Providers,
}

impl Diamond {
    /// Merges the ABI at `config.abi_path()` and prepares the resolver.
    ///
    /// No endpoint is contacted here.
    pub fn load(config: Eip155ChainConfig) -> Result<Self, DiamondError> {
        let merged = merge_abi_file(config.abi_path(), config.merge_options())?;
        let abi = merged.to_json_abi()?;
        tracing::info!(
            path = %config.abi_path().display(),
            fragments = merged.len(),
            duplicates = merged.duplicates(),
            contract = %config.contract(),
            "Loaded Diamond ABI"
        );
        let resolver = ProviderResolver::from_config(&config);
        let providers = match config.provider_cache_ttl() {
            Some(ttl) => Providers::Cached(CachedResolver::new(resolver, ttl)),
            None => Providers::Fresh(resolver),
        };
        Ok(Self {
            config,
            merged,
            abi,
            providers,
        })
    }

    pub fn config(&self) -> &Eip155ChainConfig {
        &self.config
    }

    pub fn merged_abi(&self) -> &MergedAbi {
        &self.merged
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub async fn provider(&self) -> Result<WorkingProvider, DiamondError> {
        let provider = match &self.providers {
            Providers::Fresh(resolver) => resolver.resolve().await?.client,
            Providers::Cached(cached) => cached.get().await?,
        };
        Ok(provider)
    }

    /// Drops the memoized provider so the next binding walks the candidates again.
    pub async fn invalidate_provider(&self) {
        if let Providers::Cached(cached) = &self.providers {
            cached.invalidate().await;
        }
    }

    pub async fn read_only(&self) -> Result<DiamondContract, DiamondError> {
        let provider = self.provider().await?;
        Ok(
            DiamondContract::read_only(self.config.contract(), self.abi.clone(), &provider)
                .with_receipt_timeout(self.config.receipt_timeout()),
        )
    }

    /// Binds the configured signer. Fails with [`DiamondError::NoSigner`]
    /// before any endpoint is contacted when `chain.signer` is unset.
    pub async fn signer_bound(&self) -> Result<DiamondContract, DiamondError> {
        let key = self.config.signer().ok_or(DiamondError::NoSigner)?;
        let provider = self.provider().await?;
        let contract = DiamondContract::signer_bound(self.config.contract(), self.abi.clone(), &provider, key)?
            .with_receipt_timeout(self.config.receipt_timeout());
        Ok(contract)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    pub(crate) fn write_abi(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("DiamondMergedABI.json");
        let source = json!({
            "contracts": {
                "ShopkeeperFacet": { "abi": [
                    {
                        "type": "function",
                        "name": "getShopkeeperInfo",
                        "stateMutability": "view",
                        "inputs": [{ "name": "shopkeeper", "type": "address" }],
                        "outputs": [{ "name": "shopkeeperAddress", "type": "address" }]
                    }
                ]},
                "DashboardFacet": { "abi": [
                    {
                        "type": "function",
                        "name": "getShopkeeperInfo",
                        "stateMutability": "view",
                        "inputs": [{ "name": "shopkeeper", "type": "address" }],
                        "outputs": [{ "name": "shopkeeperAddress", "type": "address" }]
                    },
                    {
                        "type": "event",
                        "name": "RationDistributed",
                        "anonymous": false,
                        "inputs": [{ "name": "consumer", "type": "address", "indexed": true }]
                    }
                ]}
            }
        });
        std::fs::write(&path, serde_json::to_vec(&source).unwrap()).unwrap();
        path
    }

    pub(crate) fn chain_config(abi_path: &Path, extra: serde_json::Value) -> Eip155ChainConfig {
        let mut config = json!({
            "abi_path": abi_path,
            "rpc": [{ "http": "http://127.0.0.1:9" }],
            "env_rpc_var": "PDS_TEST_UNSET_RPC_URL",
            "probe_timeout_secs": 1
        });
        if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(config).unwrap()
    }

    #[test]
    fn load_merges_facets() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_abi(dir.path());
        let diamond = Diamond::load(chain_config(&path, json!({}))).unwrap();
        assert_eq!(diamond.merged_abi().len(), 2);
        assert_eq!(diamond.merged_abi().duplicates(), 1);
        assert!(diamond.abi().function("getShopkeeperInfo").is_some());
    }

    #[test]
    fn missing_abi_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = Diamond::load(chain_config(&dir.path().join("absent.json"), json!({})));
        assert!(matches!(result, Err(DiamondError::Abi(AbiError::Io { .. }))));
    }

    #[tokio::test]
    async fn unreachable_rpc_fails_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_abi(dir.path());
        let diamond = Diamond::load(chain_config(&path, json!({ "provider_cache_ttl_secs": 60 }))).unwrap();
        let err = diamond.read_only().await.unwrap_err();
        assert!(matches!(
            err,
            DiamondError::Resolve(ResolveError::NoProviderAvailable { ref attempts }) if attempts.len() == 1
        ));
    }

    #[tokio::test]
    async fn signer_bound_requires_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_abi(dir.path());
        let diamond = Diamond::load(chain_config(&path, json!({}))).unwrap();
        assert!(matches!(diamond.signer_bound().await, Err(DiamondError::NoSigner)));
    }
}
