//! One mounted login screen.
//!
//! A [`LoginFlow`] lives as long as the screen that owns it. It runs at most
//! one classification at a time, persists the outcome on success, and stops
//! all pending work once [`unmount`](LoginFlow::unmount) is called.

use pds_types::wallet::WalletAddress;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::LoginError;
use crate::resolver::{Classification, ResolutionTrace, RoleResolver};
use crate::role::SessionRecord;
use crate::session::{SESSION_KEY, Session, SessionStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    /// A classification was already running; nothing was done.
    Skipped,
    Redirect {
        route: String,
        record: SessionRecord,
        trace: ResolutionTrace,
    },
    Rejected {
        message: String,
        trace: ResolutionTrace,
    },
    /// The flow was unmounted while classifying.
    Cancelled,
}

/// Resets the in-flight flag when the classification ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LoginFlow {
    resolver: Arc<RoleResolver>,
    store: Arc<dyn SessionStore>,
    cancel: CancellationToken,
    in_flight: AtomicBool,
    session_key: String,
    session: Mutex<Option<Session>>,
}

impl LoginFlow {
    pub fn mount(resolver: Arc<RoleResolver>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            resolver,
            store,
            cancel: CancellationToken::new(),
            in_flight: AtomicBool::new(false),
            session_key: SESSION_KEY.to_string(),
            session: Mutex::new(None),
        }
    }

    /// Mounts a flow whose cancellation also follows `parent`.
    pub fn mount_with_parent(
        resolver: Arc<RoleResolver>,
        store: Arc<dyn SessionStore>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            resolver,
            store,
            cancel: parent.child_token(),
            in_flight: AtomicBool::new(false),
            session_key: SESSION_KEY.to_string(),
            session: Mutex::new(None),
        }
    }

    /// Persists under `key` instead of [`SESSION_KEY`].
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn is_mounted(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Classifies `address` and persists the session on success.
    ///
    /// The stored record is never consulted here; every call re-derives the
    /// role from the membership checks.
    pub async fn login(&self, address: &str) -> Result<LoginOutcome, LoginError> {
        let wallet: WalletAddress = address.parse()?;
        if !self.is_mounted() {
            return Ok(LoginOutcome::Cancelled);
        }
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            tracing::debug!(wallet = %wallet, "Classification already running, skipping");
            return Ok(LoginOutcome::Skipped);
        };

        let classification = match self.resolver.resolve(address, &self.cancel).await {
            Ok(classification) => classification,
            Err(LoginError::Cancelled) => return Ok(LoginOutcome::Cancelled),
            Err(e) => return Err(e),
        };
        match classification {
            Classification::Classified {
                role,
                profile,
                trace,
            } => {
                if !self.is_mounted() {
                    return Ok(LoginOutcome::Cancelled);
                }
                let record = SessionRecord::new(role, profile);
                self.store.save(&self.session_key, &record).await?;
                self.set_session(Some(Session {
                    address: wallet,
                    record: record.clone(),
                }));
                Ok(LoginOutcome::Redirect {
                    route: record.route(),
                    record,
                    trace,
                })
            }
            Classification::Unclassified { message, trace } => {
                Ok(LoginOutcome::Rejected { message, trace })
            }
        }
    }

    /// Removes the persisted session record.
    pub async fn logout(&self) -> Result<(), LoginError> {
        self.store.invalidate(&self.session_key).await?;
        self.set_session(None);
        tracing::info!(key = %self.session_key, "Session invalidated");
        Ok(())
    }

    /// Abandons any running classification. The flow cannot be reused.
    pub fn unmount(&self) {
        self.cancel.cancel();
    }

    /// The session established by the last successful login of this mount.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn set_session(&self, session: Option<Session>) {
        if let Ok(mut current) = self.session.lock() {
            *current = session;
        }
    }
}

impl Drop for LoginFlow {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
