//! Networks the distribution contract is known to live on.
//!
//! The registry is intentionally small: the ration contract is deployed on
//! Polygon Amoy, and Polygon mainnet is kept as the promotion target.
//!
//! ```
//! use pds_types::networks::{POLYGON_AMOY, chain_id_by_network_name};
//!
//! let amoy = chain_id_by_network_name("polygon-amoy").unwrap();
//! assert_eq!(amoy, &POLYGON_AMOY.chain_id());
//! assert_eq!(POLYGON_AMOY.eip155_id, 80002);
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::chain::ChainId;

/// A known network definition with its chain ID and human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Human-readable network name (e.g., "polygon-amoy")
    pub name: &'static str,
    /// CAIP-2 namespace
    pub namespace: &'static str,
    /// Numeric EIP-155 chain id
    pub eip155_id: u64,
    /// Public JSON-RPC endpoints, in order of preference
    pub public_rpc: &'static [&'static str],
}

impl NetworkInfo {
    /// Create a ChainId from this network info
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.eip155_id.to_string())
    }
}

/// Polygon Amoy testnet, home of the Diamond proxy.
pub const POLYGON_AMOY: NetworkInfo = NetworkInfo {
    name: "polygon-amoy",
    namespace: "eip155",
    eip155_id: 80002,
    public_rpc: &[
        "https://rpc-amoy.polygon.technology/",
        "https://polygon-amoy-bor-rpc.publicnode.com",
    ],
};

/// Polygon PoS mainnet.
pub const POLYGON: NetworkInfo = NetworkInfo {
    name: "polygon",
    namespace: "eip155",
    eip155_id: 137,
    public_rpc: &["https://polygon-rpc.com/"],
};

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[POLYGON_AMOY, POLYGON];

static NAME_TO_CHAIN_ID: LazyLock<HashMap<&'static str, ChainId>> = LazyLock::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.name, n.chain_id()))
        .collect()
});

static CHAIN_ID_TO_NAME: LazyLock<HashMap<ChainId, &'static str>> = LazyLock::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.chain_id(), n.name))
        .collect()
});

/// Retrieves a ChainId by its network name. The lookup is case-sensitive.
pub fn chain_id_by_network_name(name: &str) -> Option<&'static ChainId> {
    NAME_TO_CHAIN_ID.get(name)
}

/// Retrieves the network name for a ChainId.
pub fn network_name_by_chain_id(chain_id: &ChainId) -> Option<&'static str> {
    CHAIN_ID_TO_NAME.get(chain_id).copied()
}

/// Retrieves the full network definition by its numeric EIP-155 id.
pub fn network_by_eip155_id(id: u64) -> Option<&'static NetworkInfo> {
    KNOWN_NETWORKS.iter().find(|n| n.eip155_id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amoy_public_endpoints_are_ordered() {
        assert_eq!(
            POLYGON_AMOY.public_rpc[0],
            "https://rpc-amoy.polygon.technology/"
        );
        assert_eq!(POLYGON_AMOY.public_rpc.len(), 2);
    }

    #[test]
    fn lookup_by_numeric_id() {
        assert_eq!(network_by_eip155_id(80002).map(|n| n.name), Some("polygon-amoy"));
        assert!(network_by_eip155_id(1).is_none());
    }
}
