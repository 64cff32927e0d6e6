//! Wallet addresses as typed by users or reported by browser wallets.
//!
//! Accepted input is `0x` followed by exactly 40 hex digits. All-lowercase and
//! all-uppercase digits are accepted as is; mixed case must be a valid EIP-55
//! checksum, which catches most transcription errors.

use alloy_primitives::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletAddressError {
    #[error("wallet address must start with 0x")]
    MissingPrefix,
    #[error("wallet address must have 40 hex digits, got {0}")]
    Length(usize),
    #[error("wallet address contains non-hex characters")]
    NonHex,
    #[error("wallet address has an invalid EIP-55 checksum")]
    Checksum,
}

/// A validated EVM wallet address.
///
/// Equality is byte equality, so comparisons are case-insensitive with respect
/// to the textual form the address was entered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletAddress(Address);

impl WalletAddress {
    pub fn address(&self) -> Address {
        self.0
    }

    /// Lowercase hex form, as stored by the membership services.
    pub fn to_lowercase_hex(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl FromStr for WalletAddress {
    type Err = WalletAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(WalletAddressError::MissingPrefix)?;
        if digits.len() != 40 {
            return Err(WalletAddressError::Length(digits.len()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WalletAddressError::NonHex);
        }
        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        let address = if has_lower && has_upper {
            Address::parse_checksummed(format!("0x{digits}"), None)
                .map_err(|_| WalletAddressError::Checksum)?
        } else {
            Address::from_str(digits).map_err(|_| WalletAddressError::NonHex)?
        };
        Ok(Self(address))
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_checksum(None))
    }
}

impl From<Address> for WalletAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl From<WalletAddress> for Address {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl Serialize for WalletAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
