//! Roles and the session record persisted after a successful login.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use url::form_urlencoded;

/// Free-form profile returned by a membership service.
pub type Profile = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "shopkeeper")]
    Shopkeeper,
    #[serde(rename = "delivery")]
    DeliveryAgent,
    #[serde(rename = "consumer")]
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Shopkeeper => "shopkeeper",
            Role::DeliveryAgent => "delivery",
            Role::Consumer => "consumer",
        }
    }

    /// Position in the classification chain. Lower ranks are checked first.
    pub fn rank(&self) -> u8 {
        match self {
            Role::Admin => 0,
            Role::Shopkeeper => 1,
            Role::DeliveryAgent => 2,
            Role::Consumer => 3,
        }
    }

    /// Response field carrying the profile in membership service replies.
    pub fn profile_field(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Shopkeeper => "shopkeeper",
            Role::DeliveryAgent => "deliveryPartner",
            Role::Consumer => "consumer",
        }
    }

    /// Dashboard route for this role. Consumers are routed by Aadhaar number
    /// when the profile carries one.
    pub fn route(&self, profile: &Profile) -> String {
        match self {
            Role::Admin => "/admin".to_string(),
            Role::Shopkeeper => "/depot".to_string(),
            Role::DeliveryAgent => "/dealer".to_string(),
            Role::Consumer => match profile.get("aadharNumber") {
                Some(Value::String(aadhaar)) if !aadhaar.is_empty() => consumer_route(aadhaar),
                Some(Value::Number(aadhaar)) => consumer_route(&aadhaar.to_string()),
                _ => "/user".to_string(),
            },
        }
    }
}

fn consumer_route(aadhaar: &str) -> String {
    let aadhaar: String = form_urlencoded::byte_serialize(aadhaar.as_bytes()).collect();
    format!("/user?aadhaar={aadhaar}")
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The advisory record stored under [`SESSION_KEY`](crate::session::SESSION_KEY).
///
/// Serializes as `{ "type": "<role>", "data": <profile> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "type")]
    pub role: Role,
    pub data: Profile,
}

impl SessionRecord {
    pub fn new(role: Role, data: Profile) -> Self {
        Self { role, data }
    }

    pub fn route(&self) -> String {
        self.role.route(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routes() {
        assert_eq!(Role::Admin.route(&Value::Null), "/admin");
        assert_eq!(Role::Shopkeeper.route(&json!({})), "/depot");
        assert_eq!(Role::DeliveryAgent.route(&json!({})), "/dealer");
        assert_eq!(
            Role::Consumer.route(&json!({ "aadharNumber": "123412341234" })),
            "/user?aadhaar=123412341234"
        );
        assert_eq!(Role::Consumer.route(&json!({ "name": "Asha" })), "/user");
    }

    #[test]
    fn consumer_route_escapes_the_aadhaar_value() {
        assert_eq!(
            Role::Consumer.route(&json!({ "aadharNumber": "1234&role=admin#x" })),
            "/user?aadhaar=1234%26role%3Dadmin%23x"
        );
        assert_eq!(
            Role::Consumer.route(&json!({ "aadharNumber": 123412341234u64 })),
            "/user?aadhaar=123412341234"
        );
    }

    #[test]
    fn record_wire_shape() {
        let record = SessionRecord::new(Role::DeliveryAgent, json!({ "name": "Ravi" }));
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({ "type": "delivery", "data": { "name": "Ravi" } })
        );
    }
}
