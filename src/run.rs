//! Process entry: loads configuration and dispatches the subcommand.

use axum::Router;
use axum::http::Method;
use clap::Parser;
use dotenvy::dotenv;
use pds_chain_eip155::abi::{MergeOptions, merge_abi_file};
use pds_chain_eip155::chain::ProviderResolver;
use pds_login::flow::{LoginFlow, LoginOutcome};
use pds_login::membership::{HttpMembershipCheck, MembershipCheck};
use pds_login::resolver::RoleResolver;
use pds_login::role::Role;
use pds_login::session::FileSessionStore;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::{cors, trace::TraceLayer};

use crate::cli::{CliArgs, Command};
use crate::config::{CheckConfig, Config, LoginConfig};
use crate::diamond::Diamond;
use crate::handlers::{self, AppState};
use crate::onchain::ContractMembershipCheck;
use crate::sig_down::SigDown;
use crate::telemetry::Telemetry;

type BoxError = Box<dyn std::error::Error>;

pub async fn run() -> Result<(), BoxError> {
    dotenv().ok();
    let _telemetry = Telemetry::init();

    let args = CliArgs::parse();
    let config = Config::load(&args.config)?;

    match args.command() {
        Command::Serve => serve(config).await,
        Command::Login { address } => login(config, &address).await,
        Command::Logout => logout(config).await,
        Command::MergeAbi {
            legacy_event_dedup,
            output,
        } => merge_abi(&config, legacy_event_dedup, output.as_deref()),
        Command::ProbeRpc => probe_rpc(&config).await,
        Command::Call { function, args } => call(config, &function, &args).await,
        Command::Send { function, args } => send(config, &function, &args).await,
    }
}

/// Builds the classification chain configured under `login`.
pub fn role_resolver(login: &LoginConfig, diamond: &Arc<Diamond>) -> RoleResolver {
    let checks = [
        (Role::Shopkeeper, &login.shopkeeper),
        (Role::DeliveryAgent, &login.delivery),
        (Role::Consumer, &login.consumer),
    ];
    checks
        .into_iter()
        .filter_map(|(role, check)| check.as_ref().map(|check| (role, check)))
        .fold(RoleResolver::new(*login.admin.inner()), |resolver, (role, check)| {
            let check: Arc<dyn MembershipCheck> = match check {
                CheckConfig::Http { url } => {
                    let http = HttpMembershipCheck::new(role, url.clone());
                    match login.check_timeout() {
                        Some(timeout) => Arc::new(http.with_timeout(timeout)),
                        None => Arc::new(http),
                    }
                }
                CheckConfig::Contract {
                    function,
                    active_field,
                } => {
                    let onchain = ContractMembershipCheck::new(role, diamond.clone(), function.clone());
                    match active_field {
                        Some(field) => Arc::new(onchain.with_active_field(field.clone())),
                        None => Arc::new(onchain),
                    }
                }
            };
            resolver.with_check(check)
        })
}

fn app_state(config: &Config, sig_down: &SigDown) -> Result<AppState, BoxError> {
    let diamond = Arc::new(Diamond::load(config.chain().clone())?);
    let resolver = Arc::new(role_resolver(config.login(), &diamond));
    tracing::info!(admin = %resolver.admin(), roles = ?resolver.roles(), "Role resolver ready");
    Ok(AppState::new(
        diamond,
        resolver,
        Arc::new(FileSessionStore::new(&config.login().session_dir)),
        sig_down.cancellation_token(),
    ))
}

async fn serve(config: Config) -> Result<(), BoxError> {
    let sig_down = SigDown::try_new()?;
    let state = Arc::new(app_state(&config, &sig_down)?);

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;
    sig_down.recv().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn login(config: Config, address: &str) -> Result<(), BoxError> {
    let sig_down = SigDown::try_new()?;
    let state = app_state(&config, &sig_down)?;
    let flow = LoginFlow::mount_with_parent(state.resolver, state.store, &state.shutdown);
    let outcome = flow.login(address).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    match outcome {
        LoginOutcome::Redirect { .. } => Ok(()),
        LoginOutcome::Rejected { message, .. } => Err(message.into()),
        LoginOutcome::Cancelled | LoginOutcome::Skipped => Err("Login cancelled".into()),
    }
}

async fn logout(config: Config) -> Result<(), BoxError> {
    let store = FileSessionStore::new(&config.login().session_dir);
    let resolver = RoleResolver::new(*config.login().admin.inner());
    LoginFlow::mount(Arc::new(resolver), Arc::new(store)).logout().await?;
    Ok(())
}

fn merge_abi(config: &Config, legacy_event_dedup: bool, output: Option<&Path>) -> Result<(), BoxError> {
    let options = if legacy_event_dedup {
        MergeOptions::legacy()
    } else {
        config.chain().merge_options()
    };
    let merged = merge_abi_file(config.chain().abi_path(), options)?;
    let rendered = serde_json::to_string_pretty(&merged.to_json())?;
    tracing::info!(fragments = merged.len(), duplicates = merged.duplicates(), "Merged Diamond ABI");
    match output {
        Some(path) => std::fs::write(path, rendered + "\n")?,
        None => println!("{rendered}"),
    }
    Ok(())
}

async fn probe_rpc(config: &Config) -> Result<(), BoxError> {
    let resolver = ProviderResolver::from_config(config.chain());
    tracing::info!(candidates = resolver.candidates().len(), chain = %config.chain().chain_id(), "Probing RPC candidates");
    let resolved = resolver.resolve().await?;
    let failed: Vec<_> = resolved
        .failed
        .iter()
        .map(|attempt| json!({ "rpc": attempt.endpoint.to_string(), "error": attempt.error.to_string() }))
        .collect();
    let report = json!({
        "chain": config.chain().chain_id().to_string(),
        "rpc": resolved.endpoint.to_string(),
        "source": format!("{:?}", resolved.endpoint.source),
        "failed": failed,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn call(config: Config, function: &str, args: &[String]) -> Result<(), BoxError> {
    let diamond = Diamond::load(config.chain().clone())?;
    let contract = diamond.read_only().await?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = contract.call_str(function, &args).await?;
    println!("{}", serde_json::to_string_pretty(&output.to_json())?);
    Ok(())
}

async fn send(config: Config, function: &str, args: &[String]) -> Result<(), BoxError> {
    let diamond = Diamond::load(config.chain().clone())?;
    let contract = diamond.signer_bound().await?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let tx_hash = contract.send_str(function, &args).await?;
    println!("{}", serde_json::to_string_pretty(&json!({ "function": function, "tx": tx_hash }))?);
    Ok(())
}
