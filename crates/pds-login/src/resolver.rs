//! Classifying a wallet into exactly one role.
//!
//! The resolver walks a fixed chain of states:
//!
//! ```text
//! Start -> CheckingAdmin -> CheckingShopkeeper -> CheckingDelivery -> CheckingConsumer
//!                 |                 |                    |                   |
//!                 +-----------------+---------> Classified <-----------------+
//!                                                                             \-> Unclassified
//! ```
//!
//! The first match wins. The admin comparison is local and issues no network
//! calls. Each membership check may fail on its own; a failure is recorded in
//! the [`ResolutionTrace`] and the walk continues.

use pds_types::wallet::WalletAddress;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::LoginError;
use crate::membership::MembershipCheck;
use crate::role::{Profile, Role};

/// Admin wallet of the Amoy deployment.
pub const DEFAULT_ADMIN_ADDRESS: &str = "0x37470c74Cc2Cb55AB1CC23b16a05F2DC657E25aa";

pub const NOT_REGISTERED_MESSAGE: &str = "This wallet address is not registered in the system. Please register first or contact your administrator.";
pub const NETWORK_ISSUES_MESSAGE: &str =
    "Unable to verify your wallet due to network issues. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverState {
    Start,
    CheckingAdmin,
    CheckingShopkeeper,
    CheckingDelivery,
    CheckingConsumer,
    Classified,
    Unclassified,
}

impl ResolverState {
    fn checking(role: Role) -> Self {
        match role {
            Role::Admin => ResolverState::CheckingAdmin,
            Role::Shopkeeper => ResolverState::CheckingShopkeeper,
            Role::DeliveryAgent => ResolverState::CheckingDelivery,
            Role::Consumer => ResolverState::CheckingConsumer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    Matched,
    NoMatch,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRecord {
    pub role: Role,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

/// Visited states and per-check outcomes of one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionTrace {
    pub states: Vec<ResolverState>,
    pub checks: Vec<CheckRecord>,
}

impl ResolutionTrace {
    fn new() -> Self {
        Self {
            states: vec![ResolverState::Start],
            checks: Vec::new(),
        }
    }

    fn enter(&mut self, state: ResolverState) {
        self.states.push(state);
    }

    fn record(&mut self, role: Role, outcome: CheckOutcome) {
        self.checks.push(CheckRecord { role, outcome });
    }

    /// Checks that got an answer, match or not.
    pub fn completed(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| !matches!(c.outcome, CheckOutcome::Failed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.checks.len() - self.completed()
    }

    /// Message shown when no role matched.
    pub fn unclassified_message(&self) -> String {
        let failed = self.failed();
        if failed == 0 {
            NOT_REGISTERED_MESSAGE.to_string()
        } else if self.completed() == 0 {
            NETWORK_ISSUES_MESSAGE.to_string()
        } else {
            format!(
                "{NOT_REGISTERED_MESSAGE} ({failed} of {} checks could not be completed.)",
                self.checks.len()
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Classified {
        role: Role,
        profile: Profile,
        trace: ResolutionTrace,
    },
    Unclassified {
        message: String,
        trace: ResolutionTrace,
    },
}

impl Classification {
    pub fn trace(&self) -> &ResolutionTrace {
        match self {
            Classification::Classified { trace, .. } | Classification::Unclassified { trace, .. } => {
                trace
            }
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Classification::Classified { role, .. } => Some(*role),
            Classification::Unclassified { .. } => None,
        }
    }
}

/// Ordered chain of membership checks behind a local admin comparison.
#[derive(Clone)]
pub struct RoleResolver {
    admin: WalletAddress,
    checks: Vec<Arc<dyn MembershipCheck>>,
}

impl RoleResolver {
    pub fn new(admin: WalletAddress) -> Self {
        Self {
            admin,
            checks: Vec::new(),
        }
    }

    /// Adds a check. Checks always run shopkeeper, then delivery, then
    /// consumer, regardless of the order they were added in.
    pub fn with_check(mut self, check: Arc<dyn MembershipCheck>) -> Self {
        self.checks.push(check);
        self.checks.sort_by_key(|c| c.role().rank());
        self
    }

    pub fn admin(&self) -> &WalletAddress {
        &self.admin
    }

    pub fn roles(&self) -> Vec<Role> {
        self.checks.iter().map(|c| c.role()).collect()
    }

    /// Classifies `address`.
    ///
    /// Returns [`LoginError::InvalidAddress`] before any check when the
    /// address is malformed, and [`LoginError::Cancelled`] as soon as `cancel`
    /// fires.
    pub async fn resolve(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Classification, LoginError> {
        let address: WalletAddress = address.parse()?;
        if cancel.is_cancelled() {
            return Err(LoginError::Cancelled);
        }
        let mut trace = ResolutionTrace::new();

        trace.enter(ResolverState::CheckingAdmin);
        if address == self.admin {
            trace.enter(ResolverState::Classified);
            tracing::info!(wallet = %address, role = %Role::Admin, "Wallet classified");
            return Ok(Classification::Classified {
                role: Role::Admin,
                profile: json!({ "address": address }),
                trace,
            });
        }

        for check in &self.checks {
            let role = check.role();
            trace.enter(ResolverState::checking(role));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(wallet = %address, role = %role, "Classification cancelled");
                    return Err(LoginError::Cancelled);
                }
                result = check.check(&address) => result,
            };
            match result {
                Ok(Some(profile)) => {
                    trace.record(role, CheckOutcome::Matched);
                    trace.enter(ResolverState::Classified);
                    tracing::info!(wallet = %address, role = %role, "Wallet classified");
                    return Ok(Classification::Classified {
                        role,
                        profile,
                        trace,
                    });
                }
                Ok(None) => trace.record(role, CheckOutcome::NoMatch),
                Err(e) => {
                    tracing::warn!(wallet = %address, role = %role, error = %e.reason, "Membership check failed");
                    trace.record(role, CheckOutcome::Failed { reason: e.reason });
                }
            }
        }

        trace.enter(ResolverState::Unclassified);
        let message = trace.unclassified_message();
        tracing::info!(wallet = %address, failed = trace.failed(), "Wallet not classified");
        Ok(Classification::Unclassified { message, trace })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::membership::MembershipCheckFailed;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const SHOPKEEPER: &str = "0x3329CA690f619bae73b9f36eb43839892D20045f";

    pub enum Scripted {
        Match(Profile),
        NoMatch,
        Fail,
    }

    /// A check with a canned answer that counts its invocations.
    pub struct FakeCheck {
        pub role: Role,
        pub answer: Scripted,
        pub calls: AtomicUsize,
    }

    impl FakeCheck {
        pub fn new(role: Role, answer: Scripted) -> Arc<Self> {
            Arc::new(Self {
                role,
                answer,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MembershipCheck for FakeCheck {
        fn role(&self) -> Role {
            self.role
        }

        async fn check(&self, _: &WalletAddress) -> Result<Option<Profile>, MembershipCheckFailed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Scripted::Match(profile) => Ok(Some(profile.clone())),
                Scripted::NoMatch => Ok(None),
                Scripted::Fail => Err(MembershipCheckFailed::new(self.role, "connection reset")),
            }
        }
    }

    fn admin() -> WalletAddress {
        DEFAULT_ADMIN_ADDRESS.parse().unwrap()
    }

    fn chain(
        shopkeeper: Scripted,
        delivery: Scripted,
        consumer: Scripted,
    ) -> (RoleResolver, [Arc<FakeCheck>; 3]) {
        let checks = [
            FakeCheck::new(Role::Shopkeeper, shopkeeper),
            FakeCheck::new(Role::DeliveryAgent, delivery),
            FakeCheck::new(Role::Consumer, consumer),
        ];
        // Added out of order on purpose.
        let resolver = RoleResolver::new(admin())
            .with_check(checks[2].clone())
            .with_check(checks[0].clone())
            .with_check(checks[1].clone());
        (resolver, checks)
    }

    #[tokio::test]
    async fn admin_short_circuits_without_checks() {
        let (resolver, checks) = chain(Scripted::Fail, Scripted::Fail, Scripted::Fail);
        let lower = DEFAULT_ADMIN_ADDRESS.to_lowercase();
        let classification = resolver
            .resolve(&lower, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(classification.role(), Some(Role::Admin));
        assert!(checks.iter().all(|c| c.calls() == 0));
        assert_eq!(
            classification.trace().states,
            [
                ResolverState::Start,
                ResolverState::CheckingAdmin,
                ResolverState::Classified
            ]
        );
    }

    #[tokio::test]
    async fn failed_check_falls_through_to_next_role() {
        let (resolver, checks) = chain(
            Scripted::Fail,
            Scripted::Match(json!({ "name": "Ravi" })),
            Scripted::NoMatch,
        );
        let classification = resolver
            .resolve(SHOPKEEPER, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(classification.role(), Some(Role::DeliveryAgent));
        assert_eq!(checks[2].calls(), 0);
        assert_eq!(
            classification.trace().checks[0].outcome,
            CheckOutcome::Failed {
                reason: "connection reset".into()
            }
        );
    }

    #[tokio::test]
    async fn failed_shopkeeper_and_unknown_delivery_fall_through_to_consumer() {
        let (resolver, checks) = chain(
            Scripted::Fail,
            Scripted::NoMatch,
            Scripted::Match(json!({ "aadharNumber": "999988887777" })),
        );
        let classification = resolver
            .resolve(SHOPKEEPER, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(classification.role(), Some(Role::Consumer));
        assert!(checks.iter().all(|c| c.calls() == 1));
        let outcomes: Vec<_> = classification
            .trace()
            .checks
            .iter()
            .map(|c| c.outcome.clone())
            .collect();
        assert_eq!(
            outcomes[0],
            CheckOutcome::Failed {
                reason: "connection reset".into()
            }
        );
        assert_eq!(outcomes[1], CheckOutcome::NoMatch);
        assert_eq!(outcomes[2], CheckOutcome::Matched);
    }

    #[tokio::test]
    async fn checks_run_in_role_order() {
        let (resolver, _) = chain(Scripted::NoMatch, Scripted::NoMatch, Scripted::NoMatch);
        assert_eq!(
            resolver.roles(),
            [Role::Shopkeeper, Role::DeliveryAgent, Role::Consumer]
        );
    }

    #[tokio::test]
    async fn no_match_everywhere_is_not_registered() {
        let (resolver, checks) = chain(Scripted::NoMatch, Scripted::NoMatch, Scripted::NoMatch);
        let classification = resolver
            .resolve(SHOPKEEPER, &CancellationToken::new())
            .await
            .unwrap();
        let Classification::Unclassified { message, trace } = classification else {
            panic!("expected unclassified");
        };
        assert_eq!(message, NOT_REGISTERED_MESSAGE);
        assert!(checks.iter().all(|c| c.calls() == 1));
        assert_eq!(trace.states.last(), Some(&ResolverState::Unclassified));
    }

    #[tokio::test]
    async fn every_check_failing_is_a_network_issue() {
        let (resolver, _) = chain(Scripted::Fail, Scripted::Fail, Scripted::Fail);
        let classification = resolver
            .resolve(SHOPKEEPER, &CancellationToken::new())
            .await
            .unwrap();
        let Classification::Unclassified { message, .. } = classification else {
            panic!("expected unclassified");
        };
        assert_eq!(message, NETWORK_ISSUES_MESSAGE);
    }

    #[tokio::test]
    async fn partial_failure_is_mentioned() {
        let (resolver, _) = chain(Scripted::NoMatch, Scripted::Fail, Scripted::NoMatch);
        let classification = resolver
            .resolve(SHOPKEEPER, &CancellationToken::new())
            .await
            .unwrap();
        let Classification::Unclassified { message, .. } = classification else {
            panic!("expected unclassified");
        };
        assert!(message.starts_with(NOT_REGISTERED_MESSAGE));
        assert!(message.contains("1 of 3 checks"));
    }

    #[tokio::test]
    async fn invalid_address_runs_no_checks() {
        let (resolver, checks) = chain(Scripted::NoMatch, Scripted::NoMatch, Scripted::NoMatch);
        let err = resolver
            .resolve("0x1234", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::InvalidAddress(_)));
        assert!(checks.iter().all(|c| c.calls() == 0));
    }
}
