//! Picking a live JSON-RPC endpoint.
//!
//! Public endpoints are tried first, in the configured order, and the
//! operator's own endpoint (read from an environment variable) is tried last.
//! The first endpoint that answers `eth_chainId` with the expected chain wins;
//! there is no racing and no retry beyond a single pass.
//!
//! The liveness probe sits behind [`EndpointProbe`] so the walk itself can be
//! exercised without a network.

use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_transport::TransportError;
use alloy_transport::layers::ThrottleLayer;
use alloy_transport_http::Http;
use async_trait::async_trait;
use pds_types::config::RpcConfig;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tower::ServiceBuilder;
use url::Url;

use crate::chain::{Eip155ChainConfig, Eip155ChainReference};

/// Where a candidate endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    Public,
    Environment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcEndpoint {
    pub rpc: RpcConfig,
    pub source: EndpointSource,
}

impl RpcEndpoint {
    pub fn url(&self) -> &Url {
        &self.rpc.http
    }
}

impl fmt::Display for RpcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rpc.http)
    }
}

/// The ordered list of endpoints a resolution walks through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderCandidates(Vec<RpcEndpoint>);

impl ProviderCandidates {
    /// Builds the candidate list, with `env_endpoint` appended last.
    ///
    /// Non-HTTP endpoints and repeated URLs are dropped; the first occurrence
    /// of a URL keeps its position.
    pub fn new(public: &[RpcConfig], env_endpoint: Option<RpcConfig>) -> Self {
        let mut seen = HashSet::new();
        let endpoints = public
            .iter()
            .cloned()
            .map(|rpc| RpcEndpoint {
                rpc,
                source: EndpointSource::Public,
            })
            .chain(env_endpoint.map(|rpc| RpcEndpoint {
                rpc,
                source: EndpointSource::Environment,
            }))
            .filter(|endpoint| {
                if !endpoint.rpc.is_http() {
                    tracing::warn!(rpc_url = %endpoint, "Ignoring non-HTTP RPC endpoint");
                    return false;
                }
                seen.insert(endpoint.rpc.http.clone())
            })
            .collect();
        Self(endpoints)
    }

    /// Candidates for `config`, reading the operator endpoint from the
    /// configured environment variable. An unset, empty or unparsable
    /// variable is skipped.
    pub fn from_config(config: &Eip155ChainConfig) -> Self {
        let env_endpoint = std::env::var(config.env_rpc_var())
            .ok()
            .filter(|value| !value.trim().is_empty())
            .and_then(|value| match value.parse::<RpcConfig>() {
                Ok(rpc) => Some(rpc),
                Err(e) => {
                    tracing::warn!(var = config.env_rpc_var(), error = %e, "Ignoring unparsable RPC URL");
                    None
                }
            });
        Self::new(config.rpc(), env_endpoint)
    }

    pub fn endpoints(&self) -> &[RpcEndpoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Chain id mismatch: expected {expected}, endpoint reports {actual}")]
    ChainMismatch { expected: u64, actual: u64 },
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Checks that an endpoint is alive and serves the expected chain, yielding a
/// client bound to it.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    type Client: Send;

    async fn probe(
        &self,
        endpoint: &RpcEndpoint,
        chain: Eip155ChainReference,
    ) -> Result<Self::Client, ProbeError>;
}

/// A provider that has answered its liveness probe.
#[derive(Clone, Debug)]
pub struct WorkingProvider {
    chain: Eip155ChainReference,
    endpoint: Url,
    client: RpcClient,
    provider: RootProvider,
}

impl WorkingProvider {
    pub fn chain(&self) -> Eip155ChainReference {
        self.chain
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The transport-level client, for layering a wallet on top.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Read-only provider.
    pub fn provider(&self) -> &RootProvider {
        &self.provider
    }

    #[cfg(test)]
    pub(crate) fn unchecked(chain: Eip155ChainReference, rpc: &RpcConfig) -> Self {
        let client = AlloyProbe::rpc_client(rpc);
        Self {
            chain,
            endpoint: rpc.http.clone(),
            provider: RootProvider::new(client.clone()),
            client,
        }
    }
}

/// Probes endpoints over HTTP with `eth_chainId`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlloyProbe;

impl AlloyProbe {
    /// A fresh, rate-limited HTTP client for one endpoint.
    pub fn rpc_client(rpc: &RpcConfig) -> RpcClient {
        let rate_limit = rpc.rate_limit.unwrap_or(u32::MAX);
        let service = ServiceBuilder::new()
            .layer(ThrottleLayer::new(rate_limit))
            .service(Http::new(rpc.http.clone()));
        RpcClient::new(service, false)
    }
}

#[async_trait]
impl EndpointProbe for AlloyProbe {
    type Client = WorkingProvider;

    async fn probe(
        &self,
        endpoint: &RpcEndpoint,
        chain: Eip155ChainReference,
    ) -> Result<WorkingProvider, ProbeError> {
        let client = Self::rpc_client(&endpoint.rpc);
        let provider: RootProvider = RootProvider::new(client.clone());
        let actual = provider.get_chain_id().await?;
        if actual != chain.inner() {
            return Err(ProbeError::ChainMismatch {
                expected: chain.inner(),
                actual,
            });
        }
        Ok(WorkingProvider {
            chain,
            endpoint: endpoint.rpc.http.clone(),
            client,
            provider,
        })
    }
}

#[derive(Debug)]
pub struct FailedAttempt {
    pub endpoint: RpcEndpoint,
    pub error: ProbeError,
}

/// A successful resolution, with the attempts that failed before it.
#[derive(Debug)]
pub struct Resolved<C> {
    pub client: C,
    pub endpoint: RpcEndpoint,
    pub failed: Vec<FailedAttempt>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No working RPC provider found ({} candidates tried)", .attempts.len())]
    NoProviderAvailable { attempts: Vec<FailedAttempt> },
}

/// Walks [`ProviderCandidates`] in order and returns the first live endpoint.
#[derive(Debug, Clone)]
pub struct ProviderResolver<P = AlloyProbe> {
    candidates: ProviderCandidates,
    chain: Eip155ChainReference,
    probe: P,
    probe_timeout: Option<Duration>,
}

impl ProviderResolver<AlloyProbe> {
    pub fn from_config(config: &Eip155ChainConfig) -> Self {
        Self::new(
            ProviderCandidates::from_config(config),
            config.chain_reference(),
            AlloyProbe,
        )
        .with_probe_timeout(config.probe_timeout())
    }
}

impl<P: EndpointProbe> ProviderResolver<P> {
    pub fn new(candidates: ProviderCandidates, chain: Eip155ChainReference, probe: P) -> Self {
        Self {
            candidates,
            chain,
            probe,
            probe_timeout: None,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn candidates(&self) -> &ProviderCandidates {
        &self.candidates
    }

    async fn probe_one(&self, endpoint: &RpcEndpoint) -> Result<P::Client, ProbeError> {
        let probe = self.probe.probe(endpoint, self.chain);
        match self.probe_timeout {
            Some(limit) => tokio::time::timeout(limit, probe)
                .await
                .map_err(|_| ProbeError::Timeout(limit))?,
            None => probe.await,
        }
    }

    /// One ordered pass over the candidates.
    pub async fn resolve(&self) -> Result<Resolved<P::Client>, ResolveError> {
        let mut failed = Vec::new();
        for endpoint in self.candidates.endpoints() {
            match self.probe_one(endpoint).await {
                Ok(client) => {
                    tracing::info!(
                        chain = %self.chain,
                        rpc_url = %endpoint,
                        source = ?endpoint.source,
                        skipped = failed.len(),
                        "Using RPC provider"
                    );
                    return Ok(Resolved {
                        client,
                        endpoint: endpoint.clone(),
                        failed,
                    });
                }
                Err(error) => {
                    tracing::warn!(chain = %self.chain, rpc_url = %endpoint, error = %error, "RPC provider failed");
                    failed.push(FailedAttempt {
                        endpoint: endpoint.clone(),
                        error,
                    });
                }
            }
        }
        tracing::error!(chain = %self.chain, attempts = failed.len(), "No working RPC provider found");
        Err(ResolveError::NoProviderAvailable { attempts: failed })
    }
}

struct CacheEntry<C> {
    client: C,
    expires_at: Instant,
}

/// Memoizes the outcome of [`ProviderResolver::resolve`] for a fixed time.
///
/// A miss or an explicit [`refresh`](Self::refresh) re-runs the full ordered
/// walk, so an expired public endpoint never shadows a healthier earlier one.
pub struct CachedResolver<P: EndpointProbe = AlloyProbe> {
    resolver: ProviderResolver<P>,
    ttl: Duration,
    entry: RwLock<Option<CacheEntry<P::Client>>>,
}

impl<P> CachedResolver<P>
where
    P: EndpointProbe,
    P::Client: Clone + Sync,
{
    pub fn new(resolver: ProviderResolver<P>, ttl: Duration) -> Self {
        Self {
            resolver,
            ttl,
            entry: RwLock::new(None),
        }
    }

    pub fn resolver(&self) -> &ProviderResolver<P> {
        &self.resolver
    }

    /// Returns the memoized client, resolving when the cache is empty or stale.
    ///
    /// Concurrent callers that find a stale entry queue on the write lock and
    /// reuse the client resolved by the first of them.
    pub async fn get(&self) -> Result<P::Client, ResolveError> {
        {
            let entry = self.entry.read().await;
            if let Some(client) = Self::fresh(&entry) {
                return Ok(client);
            }
        }
        let mut entry = self.entry.write().await;
        if let Some(client) = Self::fresh(&entry) {
            return Ok(client);
        }
        self.resolve_into(&mut entry).await
    }

    /// Forces a new resolution and replaces the memoized client.
    pub async fn refresh(&self) -> Result<P::Client, ResolveError> {
        let mut entry = self.entry.write().await;
        self.resolve_into(&mut entry).await
    }

    fn fresh(entry: &Option<CacheEntry<P::Client>>) -> Option<P::Client> {
        entry
            .as_ref()
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.client.clone())
    }

    async fn resolve_into(
        &self,
        entry: &mut Option<CacheEntry<P::Client>>,
    ) -> Result<P::Client, ResolveError> {
        match self.resolver.resolve().await {
            Ok(resolved) => {
                *entry = Some(CacheEntry {
                    client: resolved.client.clone(),
                    expires_at: Instant::now() + self.ttl,
                });
                Ok(resolved.client)
            }
            Err(e) => {
                *entry = None;
                Err(e)
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_transport::TransportErrorKind;
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AMOY: Eip155ChainReference = Eip155ChainReference::new(80002);

    /// Answers from a fixed table keyed by URL and records every probe.
    #[derive(Default)]
    struct ScriptedProbe {
        alive: Vec<(String, u64)>,
        probed: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn alive(urls: &[(&str, u64)]) -> Self {
            Self {
                alive: urls.iter().map(|(u, c)| (u.to_string(), *c)).collect(),
                probed: Mutex::default(),
            }
        }

        fn probed(&self) -> Vec<String> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EndpointProbe for ScriptedProbe {
        type Client = String;

        async fn probe(
            &self,
            endpoint: &RpcEndpoint,
            chain: Eip155ChainReference,
        ) -> Result<String, ProbeError> {
            let url = endpoint.url().to_string();
            self.probed.lock().unwrap().push(url.clone());
            match self.alive.iter().find(|(u, _)| *u == url) {
                Some((_, actual)) if *actual == chain.inner() => Ok(url),
                Some((_, actual)) => Err(ProbeError::ChainMismatch {
                    expected: chain.inner(),
                    actual: *actual,
                }),
                None => Err(TransportErrorKind::custom_str("connection refused").into()),
            }
        }
    }

    fn rpc(url: &str) -> RpcConfig {
        url.parse().unwrap()
    }

    fn three_candidates() -> ProviderCandidates {
        ProviderCandidates::new(
            &[rpc("https://a.example/"), rpc("https://b.example/")],
            Some(rpc("https://env.example/")),
        )
    }

    #[test]
    fn env_endpoint_goes_last_and_duplicates_are_dropped() {
        let candidates = ProviderCandidates::new(
            &[
                rpc("https://a.example/"),
                rpc("wss://ws.example/"),
                rpc("https://a.example/"),
                rpc("https://b.example/"),
            ],
            Some(rpc("https://b.example/")),
        );
        let urls: Vec<_> = candidates.endpoints().iter().map(|e| e.to_string()).collect();
        assert_eq!(urls, ["https://a.example/", "https://b.example/"]);
        assert!(
            candidates
                .endpoints()
                .iter()
                .all(|e| e.source == EndpointSource::Public)
        );
    }

    #[tokio::test]
    async fn walks_in_order_until_the_third_candidate_answers() {
        let probe = ScriptedProbe::alive(&[("https://env.example/", 80002)]);
        let resolver = ProviderResolver::new(three_candidates(), AMOY, probe);
        let resolved = resolver.resolve().await.unwrap();

        assert_eq!(resolved.client, "https://env.example/");
        assert_eq!(resolved.endpoint.source, EndpointSource::Environment);
        assert_eq!(resolved.failed.len(), 2);
        assert_eq!(
            resolver.probe.probed(),
            ["https://a.example/", "https://b.example/", "https://env.example/"]
        );
    }

    #[tokio::test]
    async fn first_live_candidate_short_circuits() {
        let probe = ScriptedProbe::alive(&[
            ("https://a.example/", 80002),
            ("https://env.example/", 80002),
        ]);
        let resolver = ProviderResolver::new(three_candidates(), AMOY, probe);
        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.client, "https://a.example/");
        assert_eq!(resolver.probe.probed().len(), 1);
    }

    #[tokio::test]
    async fn chain_mismatch_counts_as_failure() {
        let probe = ScriptedProbe::alive(&[
            ("https://a.example/", 137),
            ("https://b.example/", 80002),
        ]);
        let resolver = ProviderResolver::new(three_candidates(), AMOY, probe);
        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.client, "https://b.example/");
        assert!(matches!(
            resolved.failed[0].error,
            ProbeError::ChainMismatch { actual: 137, .. }
        ));
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt() {
        let resolver = ProviderResolver::new(three_candidates(), AMOY, ScriptedProbe::default());
        let ResolveError::NoProviderAvailable { attempts } = resolver.resolve().await.unwrap_err();
        assert_eq!(attempts.len(), 3);
    }

    #[tokio::test]
    async fn empty_candidate_list_is_exhausted_immediately() {
        let resolver = ProviderResolver::new(
            ProviderCandidates::default(),
            AMOY,
            ScriptedProbe::default(),
        );
        assert!(resolver.resolve().await.is_err());
    }

    struct StalledProbe;

    #[async_trait]
    impl EndpointProbe for StalledProbe {
        type Client = ();

        async fn probe(&self, _: &RpcEndpoint, _: Eip155ChainReference) -> Result<(), ProbeError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn probe_timeout_bounds_a_stalled_endpoint() {
        let resolver = ProviderResolver::new(three_candidates(), AMOY, StalledProbe)
            .with_probe_timeout(Some(Duration::from_millis(20)));
        let ResolveError::NoProviderAvailable { attempts } = resolver.resolve().await.unwrap_err();
        assert_eq!(attempts.len(), 3);
        assert!(matches!(attempts[0].error, ProbeError::Timeout(_)));
    }

    #[tokio::test]
    async fn cached_resolver_memoizes_until_invalidated() {
        let probe = ScriptedProbe::alive(&[("https://b.example/", 80002)]);
        let cached = CachedResolver::new(
            ProviderResolver::new(three_candidates(), AMOY, probe),
            Duration::from_secs(600),
        );
        assert_eq!(cached.get().await.unwrap(), "https://b.example/");
        assert_eq!(cached.get().await.unwrap(), "https://b.example/");
        assert_eq!(cached.resolver().probe.probed().len(), 2);

        cached.invalidate().await;
        cached.get().await.unwrap();
        assert_eq!(cached.resolver().probe.probed().len(), 4);

        cached.refresh().await.unwrap();
        assert_eq!(cached.resolver().probe.probed().len(), 6);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_walk() {
        let probe = ScriptedProbe::alive(&[("https://b.example/", 80002)]);
        let cached = CachedResolver::new(
            ProviderResolver::new(three_candidates(), AMOY, probe),
            Duration::from_secs(600),
        );
        let (a, b, c) = tokio::join!(cached.get(), cached.get(), cached.get());
        assert_eq!(a.unwrap(), "https://b.example/");
        assert_eq!(b.unwrap(), "https://b.example/");
        assert_eq!(c.unwrap(), "https://b.example/");
        // One walk probes a.example then b.example.
        assert_eq!(
            cached.resolver().probe.probed(),
            ["https://a.example/", "https://b.example/"]
        );
    }

    #[tokio::test]
    async fn zero_ttl_always_resolves() {
        let probe = ScriptedProbe::alive(&[("https://a.example/", 80002)]);
        let cached = CachedResolver::new(
            ProviderResolver::new(three_candidates(), AMOY, probe),
            Duration::ZERO,
        );
        cached.get().await.unwrap();
        cached.get().await.unwrap();
        assert_eq!(cached.resolver().probe.probed().len(), 2);
    }

    #[tokio::test]
    async fn alloy_probe_reports_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let endpoint = RpcEndpoint {
            rpc: rpc(&server.uri()),
            source: EndpointSource::Public,
        };
        let result = AlloyProbe.probe(&endpoint, AMOY).await;
        assert!(matches!(result, Err(ProbeError::Transport(_))));
    }
}
