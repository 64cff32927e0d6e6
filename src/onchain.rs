//! Membership checks answered by the Diamond itself.
//!
//! The role's getter (e.g. `getShopkeeperInfo(address)`) is called with the
//! wallet. A record counts as a match when it mentions the wallet and, if an
//! active flag is configured, that flag is `true`. A revert is how the facets
//! say "unknown wallet", so it completes the check without a match.

use alloy_dyn_abi::DynSolValue;
use async_trait::async_trait;
use pds_chain_eip155::contract::ContractError;
use pds_login::membership::{MembershipCheck, MembershipCheckFailed};
use pds_login::role::{Profile, Role};
use pds_types::wallet::WalletAddress;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::diamond::Diamond;

pub struct ContractMembershipCheck {
    role: Role,
    diamond: Arc<Diamond>,
    function: String,
    active_field: Option<String>,
}

impl ContractMembershipCheck {
    pub fn new(role: Role, diamond: Arc<Diamond>, function: impl Into<String>) -> Self {
        Self {
            role,
            diamond,
            function: function.into(),
            active_field: None,
        }
    }

    pub fn with_active_field(mut self, field: impl Into<String>) -> Self {
        self.active_field = Some(field.into());
        self
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    fn failed(&self, reason: impl ToString) -> MembershipCheckFailed {
        MembershipCheckFailed::new(self.role, reason.to_string())
    }

    /// Turns a decoded record into a profile, or `None` when it does not
    /// describe an active `address`.
    fn profile_from(&self, record: Value, address: &WalletAddress) -> Option<Profile> {
        if !contains_address(&record, address) {
            return None;
        }
        if let Some(field) = &self.active_field {
            if find_field(&record, field) != Some(&Value::Bool(true)) {
                tracing::debug!(role = %self.role, wallet = %address, field = %field, "Record found but not active");
                return None;
            }
        }
        let profile = match record {
            Value::Object(mut object) => {
                object.insert("source".to_string(), json!("blockchain"));
                Value::Object(object)
            }
            other => json!({ "record": other, "source": "blockchain" }),
        };
        Some(profile)
    }
}

#[async_trait]
impl MembershipCheck for ContractMembershipCheck {
    fn role(&self) -> Role {
        self.role
    }

    async fn check(&self, address: &WalletAddress) -> Result<Option<Profile>, MembershipCheckFailed> {
        let contract = self.diamond.read_only().await.map_err(|e| self.failed(e))?;
        let args = [DynSolValue::Address(address.address())];
        match contract.call(&self.function, &args).await {
            Ok(output) => Ok(self.profile_from(output.to_json(), address)),
            Err(ContractError::Call(alloy_contract::Error::TransportError(e))) if e.as_error_resp().is_some() => {
                tracing::debug!(role = %self.role, wallet = %address, error = %e, "Diamond rejected lookup");
                Ok(None)
            }
            Err(e @ ContractError::Call(alloy_contract::Error::TransportError(_))) => {
                self.diamond.invalidate_provider().await;
                Err(self.failed(e))
            }
            Err(e) => Err(self.failed(e)),
        }
    }
}

/// Whether any string in `value` spells `address`, ignoring case.
fn contains_address(value: &Value, address: &WalletAddress) -> bool {
    let needle = address.to_lowercase_hex();
    match value {
        Value::String(s) => s.eq_ignore_ascii_case(&needle),
        Value::Array(items) => items.iter().any(|item| contains_address(item, address)),
        Value::Object(object) => object.values().any(|item| contains_address(item, address)),
        _ => false,
    }
}

/// First value stored under `name`, searched depth-first.
fn find_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(object) => object
            .get(name)
            .or_else(|| object.values().find_map(|item| find_field(item, name))),
        Value::Array(items) => items.iter().find_map(|item| find_field(item, name)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diamond::tests::{chain_config, write_abi};

    const AGENT: &str = "0x3329CA690f619bae73b9f36eb43839892D20045f";

    fn wallet() -> WalletAddress {
        AGENT.parse().unwrap()
    }

    fn check(active_field: Option<&str>) -> (ContractMembershipCheck, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_abi(dir.path());
        let diamond = Arc::new(Diamond::load(chain_config(&path, json!({}))).unwrap());
        let check = ContractMembershipCheck::new(Role::DeliveryAgent, diamond, "getDeliveryAgentInfo");
        let check = match active_field {
            Some(field) => check.with_active_field(field),
            None => check,
        };
        (check, dir)
    }

    #[test]
    fn address_search_is_case_insensitive_and_deep() {
        let record = json!({ "agent": { "wallet": AGENT.to_lowercase() }, "name": "Ravi" });
        assert!(contains_address(&record, &wallet()));
        assert!(!contains_address(&json!({ "wallet": "0x0000000000000000000000000000000000000000" }), &wallet()));
        assert!(contains_address(&json!([AGENT]), &wallet()));
    }

    #[test]
    fn find_field_prefers_the_outer_level() {
        let record = json!({ "isActive": false, "inner": { "isActive": true } });
        assert_eq!(find_field(&record, "isActive"), Some(&json!(false)));
        assert_eq!(find_field(&json!([{ "x": 1 }]), "x"), Some(&json!(1)));
        assert_eq!(find_field(&json!("x"), "x"), None);
    }

    #[test]
    fn active_record_becomes_a_blockchain_profile() {
        let (check, _dir) = check(Some("isActive"));
        let record = json!({ "agentAddress": AGENT, "name": "Ravi", "isActive": true });
        let profile = check.profile_from(record, &wallet()).unwrap();
        assert_eq!(profile["source"], "blockchain");
        assert_eq!(profile["name"], "Ravi");
    }

    #[test]
    fn inactive_or_foreign_records_do_not_match() {
        let (check, _dir) = check(Some("isActive"));
        let inactive = json!({ "agentAddress": AGENT, "isActive": false });
        assert!(check.profile_from(inactive, &wallet()).is_none());
        let missing_flag = json!({ "agentAddress": AGENT });
        assert!(check.profile_from(missing_flag, &wallet()).is_none());
        let zero = json!({ "agentAddress": "0x0000000000000000000000000000000000000000", "isActive": true });
        assert!(check.profile_from(zero, &wallet()).is_none());
    }

    #[test]
    fn bare_address_output_is_wrapped() {
        let (check, _dir) = check(None);
        let profile = check.profile_from(json!(AGENT), &wallet()).unwrap();
        assert_eq!(profile["record"], AGENT);
        assert_eq!(profile["source"], "blockchain");
    }

    #[tokio::test]
    async fn unreachable_chain_fails_the_check() {
        let (check, _dir) = check(None);
        let err = check.check(&wallet()).await.unwrap_err();
        assert_eq!(err.role, Role::DeliveryAgent);
        assert!(err.reason.contains("No working RPC provider"));
    }
}
