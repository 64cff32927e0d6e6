//! Membership checks: "is this wallet a shopkeeper / delivery agent / consumer?"
//!
//! Each check is independently fallible. A check that cannot reach its
//! service, or gets an unusable reply, reports [`MembershipCheckFailed`]; the
//! role resolver logs it and moves on to the next role.
//!
//! [`HttpMembershipCheck`] talks to the dashboard's login services:
//!
//! ```text
//! POST <url>            { "walletAddress": "0x..." }
//! 200 OK                { "success": true, "shopkeeper": { ... } }
//! ```

use async_trait::async_trait;
use pds_types::wallet::WalletAddress;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

use crate::role::{Profile, Role};

#[derive(Debug, Clone, thiserror::Error)]
#[error("{role} membership check failed: {reason}")]
pub struct MembershipCheckFailed {
    pub role: Role,
    pub reason: String,
}

impl MembershipCheckFailed {
    pub fn new(role: Role, reason: impl Into<String>) -> Self {
        Self {
            role,
            reason: reason.into(),
        }
    }
}

/// One link of the classification chain.
#[async_trait]
pub trait MembershipCheck: Send + Sync {
    fn role(&self) -> Role;

    /// `Ok(Some(profile))` on a match, `Ok(None)` when the service answered
    /// and the wallet is not a member.
    async fn check(&self, address: &WalletAddress) -> Result<Option<Profile>, MembershipCheckFailed>;
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipClientError {
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MembershipRequest {
    wallet_address: String,
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

/// JavaScript truthiness, as the services' clients interpret profiles.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Membership check backed by a login service over HTTP.
#[derive(Clone, Debug)]
pub struct HttpMembershipCheck {
    role: Role,
    url: Url,
    client: Client,
    timeout: Option<Duration>,
}

impl HttpMembershipCheck {
    pub fn new(role: Role, url: Url) -> Self {
        Self {
            role,
            url,
            client: Client::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Shopkeeper and delivery services must confirm with `success: true`.
    /// The consumer service often omits the flag, so only an explicit
    /// `false` is a decline there.
    fn accepts(&self, success: Option<bool>) -> bool {
        match self.role {
            Role::Consumer => success != Some(false),
            _ => success == Some(true),
        }
    }

    async fn post_json(&self, address: &WalletAddress) -> Result<MembershipResponse, MembershipClientError> {
        let context = "POST membership";
        let payload = MembershipRequest {
            wallet_address: address.to_string(),
        };
        let mut req = self.client.post(self.url.clone()).json(&payload);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| MembershipClientError::Http { context, source: e })?;

        if http_response.status() == StatusCode::OK {
            http_response
                .json::<MembershipResponse>()
                .await
                .map_err(|e| MembershipClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| MembershipClientError::ResponseBodyRead { context, source: e })?;
            Err(MembershipClientError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}

#[async_trait]
impl MembershipCheck for HttpMembershipCheck {
    fn role(&self) -> Role {
        self.role
    }

    async fn check(&self, address: &WalletAddress) -> Result<Option<Profile>, MembershipCheckFailed> {
        let response = self
            .post_json(address)
            .await
            .map_err(|e| MembershipCheckFailed::new(self.role, e.to_string()))?;
        if !self.accepts(response.success) {
            if let Some(error) = &response.error {
                tracing::info!(role = %self.role, wallet = %address, error = %error, "Membership service declined wallet");
            }
            return Ok(None);
        }
        let profile = response
            .fields
            .get(self.role.profile_field())
            .filter(|profile| is_truthy(profile))
            .cloned();
        Ok(profile)
    }
}
