//! HTTP endpoints of the gateway.
//!
//! - `GET /health` reports the configured chain and Diamond address.
//! - `GET /abi` serves the merged Diamond ABI.
//! - `POST /login` classifies `{ "walletAddress": "0x..." }`. A redirect
//!   carries a fresh `sessionId` naming the record persisted for this client.
//! - `POST /logout` removes the record named by the `x-pds-session` header.
//! - `GET /session` returns the record named by the `x-pds-session` header.
//! - `POST /call` executes a view function: `{ "function": "...", "args": ["..."] }`.

use alloy_primitives::hex;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pds_chain_eip155::contract::ContractError;
use pds_login::LoginError;
use pds_login::flow::{LoginFlow, LoginOutcome};
use pds_login::resolver::RoleResolver;
use pds_login::session::{SessionStore, client_session_key};
use pds_types::wallet::WalletAddress;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::diamond::{Diamond, DiamondError};

/// Header naming the caller's session record.
pub const SESSION_HEADER: &str = "x-pds-session";

/// A login running for one wallet, and the session id it persists under.
struct ClientFlow {
    session_id: String,
    flow: Arc<LoginFlow>,
}

pub struct AppState {
    pub diamond: Arc<Diamond>,
    pub resolver: Arc<RoleResolver>,
    pub store: Arc<dyn SessionStore>,
    /// Cancelled on shutdown; every login flow is mounted under it.
    pub shutdown: CancellationToken,
    flows: Mutex<HashMap<WalletAddress, ClientFlow>>,
}

impl AppState {
    pub fn new(
        diamond: Arc<Diamond>,
        resolver: Arc<RoleResolver>,
        store: Arc<dyn SessionStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            diamond,
            resolver,
            store,
            shutdown,
            flows: Mutex::default(),
        }
    }

    fn mount_flow(&self, session_id: &str) -> LoginFlow {
        LoginFlow::mount_with_parent(self.resolver.clone(), self.store.clone(), &self.shutdown)
            .with_session_key(client_session_key(session_id))
    }

    /// The flow already classifying `wallet`, or a new one under a fresh session id.
    fn flow_for(&self, wallet: WalletAddress) -> Option<(String, Arc<LoginFlow>)> {
        let mut flows = self.flows.lock().ok()?;
        let entry = flows.entry(wallet).or_insert_with(|| {
            let session_id = new_session_id();
            ClientFlow {
                flow: Arc::new(self.mount_flow(&session_id)),
                session_id,
            }
        });
        Some((entry.session_id.clone(), entry.flow.clone()))
    }

    fn release_flow(&self, wallet: &WalletAddress, flow: &Arc<LoginFlow>) {
        if let Ok(mut flows) = self.flows.lock() {
            if flows.get(wallet).is_some_and(|f| Arc::ptr_eq(&f.flow, flow)) {
                flows.remove(wallet);
            }
        }
    }
}

fn new_session_id() -> String {
    let bytes: [u8; 32] = rng().random();
    hex::encode(bytes)
}

/// The session id from the request headers, if well formed.
fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit()))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/abi", get(get_abi))
        .route("/login", post(post_login))
        .route("/logout", post(post_logout))
        .route("/session", get(get_session))
        .route("/call", post(post_call))
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

#[instrument(skip_all)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.diamond.config();
    Json(json!({
        "status": "ok",
        "network": config.chain_id().to_string(),
        "contract": config.contract().to_checksum(None),
        "fragments": state.diamond.merged_abi().len(),
    }))
}

#[instrument(skip_all)]
pub async fn get_abi(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.diamond.merged_abi().to_json())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub outcome: LoginOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[instrument(skip_all, fields(wallet = %body.wallet_address))]
pub async fn post_login(State(state): State<Arc<AppState>>, Json(body): Json<LoginRequest>) -> Response {
    let wallet: WalletAddress = match body.wallet_address.parse() {
        Ok(wallet) => wallet,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, LoginError::InvalidAddress(e)),
    };
    let Some((session_id, flow)) = state.flow_for(wallet) else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Login state unavailable");
    };
    let result = flow.login(&body.wallet_address).await;
    if !matches!(result, Ok(LoginOutcome::Skipped)) {
        state.release_flow(&wallet, &flow);
    }
    let respond = |status: StatusCode, outcome: LoginOutcome, session_id: Option<String>| {
        (status, Json(LoginResponse { outcome, session_id })).into_response()
    };
    match result {
        Ok(outcome @ LoginOutcome::Redirect { .. }) => respond(StatusCode::OK, outcome, Some(session_id)),
        Ok(outcome @ LoginOutcome::Rejected { .. }) => respond(StatusCode::FORBIDDEN, outcome, None),
        Ok(outcome @ LoginOutcome::Skipped) => respond(StatusCode::CONFLICT, outcome, None),
        Ok(outcome @ LoginOutcome::Cancelled) => respond(StatusCode::SERVICE_UNAVAILABLE, outcome, None),
        Err(e @ LoginError::InvalidAddress(_)) => error_response(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            tracing::error!(error = %e, "Login failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

#[instrument(skip_all)]
pub async fn post_logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, format!("Missing or malformed {SESSION_HEADER} header"));
    };
    match state.mount_flow(id).logout().await {
        Ok(()) => Json(json!({ "status": "logged_out" })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Logout failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

#[instrument(skip_all)]
pub async fn get_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, format!("Missing or malformed {SESSION_HEADER} header"));
    };
    match state.store.load(&client_session_key(id)).await {
        Ok(Some(record)) => Json(json!({ "route": record.route(), "record": record })).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No active session"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[instrument(skip_all, fields(function = %body.function))]
pub async fn post_call(State(state): State<Arc<AppState>>, Json(body): Json<CallRequest>) -> Response {
    let contract = match state.diamond.read_only().await {
        Ok(contract) => contract,
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    };
    let args: Vec<&str> = body.args.iter().map(String::as_str).collect();
    match contract.call_str(&body.function, &args).await {
        Ok(output) => Json(json!({ "function": body.function, "result": output.to_json() })).into_response(),
        Err(
            e @ (ContractError::UnknownFunction(_)
            | ContractError::NoMatchingOverload { .. }
            | ContractError::Coerce { .. }),
        ) => error_response(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            tracing::warn!(error = %e, "Diamond call failed");
            state.diamond.invalidate_provider().await;
            error_response(StatusCode::BAD_GATEWAY, DiamondError::from(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diamond::tests::{chain_config, write_abi};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use pds_login::membership::{MembershipCheck, MembershipCheckFailed};
    use pds_login::resolver::DEFAULT_ADMIN_ADDRESS;
    use pds_login::role::Role;
    use pds_login::session::MemorySessionStore;
    use serde_json::Value;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        store: Arc<MemorySessionStore>,
        _dir: tempfile::TempDir,
    }

    const CONSUMER: &str = "0x3329CA690f619bae73b9f36eb43839892D20045f";

    /// Answers every wallet the same way.
    struct StaticCheck {
        role: Role,
        profile: Option<Value>,
    }

    #[async_trait]
    impl MembershipCheck for StaticCheck {
        fn role(&self) -> Role {
            self.role
        }

        async fn check(&self, _: &WalletAddress) -> Result<Option<Value>, MembershipCheckFailed> {
            Ok(self.profile.clone())
        }
    }

    /// Holds a classification open until released.
    struct GatedCheck {
        entered: Notify,
        release: Notify,
    }

    impl GatedCheck {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entered: Notify::new(),
                release: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl MembershipCheck for GatedCheck {
        fn role(&self) -> Role {
            Role::Consumer
        }

        async fn check(&self, _: &WalletAddress) -> Result<Option<Value>, MembershipCheckFailed> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Some(json!({})))
        }
    }

    fn consumer_check(profile: Option<Value>) -> Arc<StaticCheck> {
        Arc::new(StaticCheck {
            role: Role::Consumer,
            profile,
        })
    }

    fn harness() -> Harness {
        harness_with(
            RoleResolver::new(DEFAULT_ADMIN_ADDRESS.parse().unwrap())
                .with_check(consumer_check(Some(json!({ "aadharNumber": "999988887777" })))),
        )
    }

    fn harness_with(resolver: RoleResolver) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = write_abi(dir.path());
        let diamond = Arc::new(Diamond::load(chain_config(&path, serde_json::json!({}))).unwrap());
        let store = Arc::new(MemorySessionStore::new());
        let state = Arc::new(AppState::new(
            diamond,
            Arc::new(resolver),
            store.clone(),
            CancellationToken::new(),
        ));
        Harness {
            app: routes().with_state(state),
            store,
            _dir: dir,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_session_as(session_id: &str) -> Request<Body> {
        Request::get("/session")
            .header(SESSION_HEADER, session_id)
            .body(Body::empty())
            .unwrap()
    }

    fn logout_as(session_id: &str) -> Request<Body> {
        Request::post("/logout")
            .header(SESSION_HEADER, session_id)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_and_abi() {
        let h = harness();
        let (status, body) = send(&h.app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["network"], "eip155:80002");

        let (status, body) = send(&h.app, Request::get("/abi").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn admin_login_then_logout() {
        let h = harness();
        let (status, body) = send(&h.app, post_json("/login", json!({ "walletAddress": DEFAULT_ADMIN_ADDRESS }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "redirect");
        assert_eq!(body["route"], "/admin");
        let session_id = body["sessionId"].as_str().unwrap().to_string();
        assert!(h.store.load(&client_session_key(&session_id)).await.unwrap().is_some());

        let (status, body) = send(&h.app, get_session_as(&session_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["record"]["type"], "admin");

        let (status, _) = send(&h.app, logout_as(&session_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.store.load(&client_session_key(&session_id)).await.unwrap().is_none());

        let (status, _) = send(&h.app, get_session_as(&session_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn clients_cannot_read_or_clear_each_others_sessions() {
        let h = harness();
        let (status, a) = send(&h.app, post_json("/login", json!({ "walletAddress": CONSUMER }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(a["route"], "/user?aadhaar=999988887777");
        let a_id = a["sessionId"].as_str().unwrap().to_string();

        let (status, b) = send(&h.app, post_json("/login", json!({ "walletAddress": DEFAULT_ADMIN_ADDRESS }))).await;
        assert_eq!(status, StatusCode::OK);
        let b_id = b["sessionId"].as_str().unwrap().to_string();
        assert_ne!(a_id, b_id);

        // Without a session id there is nothing to read or clear.
        let (status, body) = send(&h.app, Request::get("/session").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("record").is_none());
        let (status, _) = send(&h.app, post_json("/logout", json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // B sees only its own record, and its logout leaves A's in place.
        let (status, body) = send(&h.app, get_session_as(&b_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["record"]["type"], "admin");
        let (status, _) = send(&h.app, logout_as(&b_id)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&h.app, get_session_as(&a_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["record"]["type"], "consumer");

        let guessed = "0".repeat(64);
        let (status, _) = send(&h.app, get_session_as(&guessed)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn concurrent_login_for_one_wallet_conflicts() {
        let gate = GatedCheck::new();
        let h = harness_with(RoleResolver::new(DEFAULT_ADMIN_ADDRESS.parse().unwrap()).with_check(gate.clone()));
        let first = tokio::spawn({
            let app = h.app.clone();
            async move { send(&app, post_json("/login", json!({ "walletAddress": CONSUMER }))).await }
        });
        gate.entered.notified().await;

        let (status, body) = send(&h.app, post_json("/login", json!({ "walletAddress": CONSUMER }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "skipped");
        assert!(body.get("sessionId").is_none());

        gate.release.notify_one();
        let (status, body) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["route"], "/user");

        // The wallet can log in again once the first classification ended.
        gate.release.notify_one();
        let (status, _) = send(&h.app, post_json("/login", json!({ "walletAddress": CONSUMER }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_wallet_is_rejected() {
        let h = harness_with(
            RoleResolver::new(DEFAULT_ADMIN_ADDRESS.parse().unwrap()).with_check(consumer_check(None)),
        );
        let (status, body) = send(&h.app, post_json("/login", json!({ "walletAddress": CONSUMER }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "rejected");
        assert!(body.get("sessionId").is_none());
    }

    #[tokio::test]
    async fn malformed_wallet_is_a_bad_request() {
        let h = harness();
        let (status, body) = send(&h.app, post_json("/login", json!({ "walletAddress": "0x1234" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("40 hex digits"));
    }

    #[tokio::test]
    async fn call_without_rpc_is_unavailable() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            post_json("/call", json!({ "function": "getShopkeeperInfo", "args": [DEFAULT_ADMIN_ADDRESS] })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
