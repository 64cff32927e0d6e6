//! Configuration of the `pds` gateway.
//!
//! Loaded from the JSON file named by `--config` (or `$CONFIG`). Every section
//! is optional; an empty object yields a gateway for the Amoy deployment.
//!
//! ```json
//! {
//!   "port": 8080,
//!   "chain": { "network": "eip155:80002", "contract": "$CONTRACT_ADDRESS" },
//!   "login": {
//!     "admin": "0x37470c74Cc2Cb55AB1CC23b16a05F2DC657E25aa",
//!     "consumer": { "kind": "http", "url": "http://localhost:3000/api/consumer-wallet-login" }
//!   }
//! }
//! ```

use pds_chain_eip155::chain::Eip155ChainConfig;
use pds_login::resolver::DEFAULT_ADMIN_ADDRESS;
use pds_types::config::LiteralOrEnv;
use pds_types::wallet::WalletAddress;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default)]
    chain: Eip155ChainConfig,
    #[serde(default)]
    login: LoginConfig,
}

/// How one role's membership is decided.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckConfig {
    /// POST `{ walletAddress }` to a login service.
    Http { url: Url },
    /// Call `function(address)` on the Diamond.
    Contract {
        function: String,
        /// Boolean output that must be `true` for the record to count.
        #[serde(default)]
        active_field: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    #[serde(default = "config_defaults::default_admin")]
    pub admin: LiteralOrEnv<WalletAddress>,
    /// Directory holding `currentUser.json`.
    #[serde(default = "config_defaults::default_session_dir")]
    pub session_dir: PathBuf,
    /// Per-check timeout for HTTP membership services.
    #[serde(default)]
    pub check_timeout_secs: Option<u64>,
    #[serde(default = "config_defaults::default_shopkeeper_check")]
    pub shopkeeper: Option<CheckConfig>,
    #[serde(default = "config_defaults::default_delivery_check")]
    pub delivery: Option<CheckConfig>,
    #[serde(default = "config_defaults::default_consumer_check")]
    pub consumer: Option<CheckConfig>,
}

impl LoginConfig {
    pub fn check_timeout(&self) -> Option<Duration> {
        self.check_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            admin: config_defaults::default_admin(),
            session_dir: config_defaults::default_session_dir(),
            check_timeout_secs: None,
            shopkeeper: config_defaults::default_shopkeeper_check(),
            delivery: config_defaults::default_delivery_check(),
            consumer: config_defaults::default_consumer_check(),
        }
    }
}

pub mod config_defaults {
    use super::*;
    use std::env;
    use std::net::Ipv4Addr;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_CONSUMER_LOGIN_URL: &str = "http://localhost:3000/api/consumer-wallet-login";

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn default_admin() -> LiteralOrEnv<WalletAddress> {
        let admin = DEFAULT_ADMIN_ADDRESS
            .parse()
            .unwrap_or_else(|_| WalletAddress::from(alloy_primitives::Address::ZERO));
        LiteralOrEnv::from_literal(admin)
    }

    pub fn default_session_dir() -> PathBuf {
        PathBuf::from(".pds-session")
    }

    pub fn default_shopkeeper_check() -> Option<CheckConfig> {
        Some(CheckConfig::Contract {
            function: "getShopkeeperInfo".to_string(),
            active_field: None,
        })
    }

    pub fn default_delivery_check() -> Option<CheckConfig> {
        Some(CheckConfig::Contract {
            function: "getDeliveryAgentInfo".to_string(),
            active_field: Some("isActive".to_string()),
        })
    }

    pub fn default_consumer_check() -> Option<CheckConfig> {
        DEFAULT_CONSUMER_LOGIN_URL
            .parse()
            .ok()
            .map(|url| CheckConfig::Http { url })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn chain(&self) -> &Eip155ChainConfig {
        &self.chain
    }

    pub fn login(&self) -> &LoginConfig {
        &self.login
    }

    /// Loads the configuration file at `path`.
    ///
    /// A missing file at the default location yields the built-in defaults, so
    /// `pds` runs out of the box against Amoy.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && path == Path::new("config.json") => {
                tracing::info!("No config.json found, using defaults");
                Ok(serde_json::from_str("{}")?)
            }
            Err(e) => Err(ConfigError::FileRead(path.to_path_buf(), e)),
        }
    }
}
