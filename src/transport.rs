//! Outbound transport pool: cached handles bound to concrete egress
//! identities, never aware of queries or engines.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::OutboundConfig;
use crate::egress::{EgressSelection, EndpointPool};
use crate::engine::{HttpMethod, RawResponse, RequestBody, RequestSpec};
use crate::{Result, SearchError};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; searchmux/0.1)";

/// Default endpoint for anonymized-egress verification.
const EGRESS_CHECK_URL: &str = "https://check.torproject.org/api/ip";

/// Key identifying one concrete transport binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    /// Pattern -> proxy URL.
    pub proxies: BTreeMap<String, String>,
    /// Local source address to bind.
    pub source_address: Option<IpAddr>,
    /// Whether TLS certificates are verified.
    pub verify_tls: bool,
    /// Redirect limit.
    pub max_redirects: usize,
}

impl BindingKey {
    fn from_selection(selection: EgressSelection, config: &OutboundConfig) -> Self {
        Self {
            proxies: selection.proxies,
            source_address: selection.source_address,
            verify_tls: config.verify_tls,
            max_redirects: config.max_redirects,
        }
    }
}

/// Anything that can execute one outbound request with a hard per-call
/// timeout. Implemented by [`TransportHandle`]; tests substitute mocks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes the request, failing once `timeout` elapses.
    async fn send(&self, spec: &RequestSpec, timeout: Duration) -> Result<RawResponse>;
}

/// Source of transports following the configured egress rotation.
/// Implemented by [`TransportPool`]; tests substitute mocks.
#[async_trait]
pub trait TransportSource: Send + Sync {
    /// Acquires a transport on the next egress rotation.
    async fn next_transport(&self) -> Result<Arc<dyn Transport>>;
}

/// A pooled HTTP client bound to one egress identity.
#[derive(Debug)]
pub struct TransportHandle {
    client: Client,
    key: BindingKey,
    closed: AtomicBool,
}

impl TransportHandle {
    /// The binding this handle was created for.
    pub fn key(&self) -> &BindingKey {
        &self.key
    }

    /// Marks the handle closed; subsequent sends fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for TransportHandle {
    async fn send(&self, spec: &RequestSpec, timeout: Duration) -> Result<RawResponse> {
        if self.is_closed() {
            return Err(SearchError::Transport("transport handle closed".into()));
        }

        // Reject malformed URLs before any connection is attempted.
        let url = url::Url::parse(&spec.url)?;
        let mut request = match spec.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        if !spec.params.is_empty() {
            request = request.query(&spec.params);
        }
        for (key, value) in &spec.headers {
            request = request.header(key, value);
        }
        request = match &spec.body {
            Some(RequestBody::Form(fields)) => request.form(fields),
            Some(RequestBody::Json(value)) => request.json(value),
            None => request,
        };

        let response = request.timeout(timeout).send().await?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EgressCheckReply {
    #[serde(rename = "IsTor")]
    is_tor: bool,
}

/// Owns pooled connections and the handle cache; hands out handles for
/// rotating egress bindings.
pub struct TransportPool {
    config: OutboundConfig,
    endpoints: EndpointPool,
    handles: RwLock<HashMap<BindingKey, Arc<TransportHandle>>>,
    verified: RwLock<HashMap<String, bool>>,
    egress_check_url: String,
}

impl TransportPool {
    /// Creates a pool from outbound configuration.
    pub fn new(config: OutboundConfig) -> Result<Self> {
        let bindings = config
            .proxies
            .clone()
            .map(|p| p.into_bindings())
            .unwrap_or_default();
        let endpoints = EndpointPool::with_bindings(bindings, &config.source_address_specs())?;
        Ok(Self {
            config,
            endpoints,
            handles: RwLock::new(HashMap::new()),
            verified: RwLock::new(HashMap::new()),
            egress_check_url: EGRESS_CHECK_URL.to_string(),
        })
    }

    /// Overrides the anonymized-egress verification endpoint.
    pub fn with_egress_check_url(mut self, url: impl Into<String>) -> Self {
        self.egress_check_url = url.into();
        self
    }

    /// The outbound configuration this pool was built with.
    pub fn config(&self) -> &OutboundConfig {
        &self.config
    }

    /// Advances the egress rotation and returns the next binding key.
    pub fn next_binding(&self) -> BindingKey {
        BindingKey::from_selection(self.endpoints.next(), &self.config)
    }

    /// Returns a cached, open handle for `binding`, creating one if absent
    /// or closed. Anonymized egress triggers a one-time verification call
    /// per proxy identity; a failed verification is a configuration error
    /// raised immediately.
    pub async fn acquire(&self, binding: &BindingKey) -> Result<Arc<TransportHandle>> {
        if let Some(handle) = self
            .handles
            .read()
            .expect("handle cache lock")
            .get(binding)
        {
            if !handle.is_closed() {
                return Ok(Arc::clone(handle));
            }
        }

        let handle = Arc::new(self.build_handle(binding)?);

        if self.config.using_anonymized_egress {
            self.verify_anonymized(binding, &handle).await?;
        }

        let mut handles = self.handles.write().expect("handle cache lock");
        let entry = handles.entry(binding.clone()).or_insert_with(|| {
            debug!(?binding, "Created transport handle");
            Arc::clone(&handle)
        });
        if entry.is_closed() {
            *entry = Arc::clone(&handle);
        }
        Ok(Arc::clone(entry))
    }

    fn build_handle(&self, binding: &BindingKey) -> Result<TransportHandle> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(self.config.pool_connections)
            .pool_idle_timeout(self.config.pool_keepalive_duration())
            .redirect(Policy::limited(binding.max_redirects))
            .danger_accept_invalid_certs(!binding.verify_tls);

        if let Some(addr) = binding.source_address {
            builder = builder.local_address(addr);
        }

        for (pattern, proxy_url) in &binding.proxies {
            let proxy = match pattern.as_str() {
                "all://" => reqwest::Proxy::all(proxy_url),
                "http://" => reqwest::Proxy::http(proxy_url),
                "https://" => reqwest::Proxy::https(proxy_url),
                prefix => {
                    let prefix = prefix.to_string();
                    let target = proxy_url.clone();
                    Ok(reqwest::Proxy::custom(move |url| {
                        url.as_str().starts_with(&prefix).then(|| target.clone())
                    }))
                }
            }
            .map_err(|e| SearchError::Config(format!("invalid proxy URL {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| SearchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(TransportHandle {
            client,
            key: binding.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Verifies every proxy identity of `binding` once, caching the result.
    async fn verify_anonymized(
        &self,
        binding: &BindingKey,
        handle: &TransportHandle,
    ) -> Result<()> {
        for proxy_url in binding.proxies.values() {
            if let Some(&ok) = self
                .verified
                .read()
                .expect("verification cache lock")
                .get(proxy_url)
            {
                if ok {
                    continue;
                }
                return Err(SearchError::Config(format!(
                    "anonymized egress verification previously failed for {proxy_url}"
                )));
            }

            let spec = RequestSpec::get(&self.egress_check_url);
            let ok = match handle
                .send(&spec, self.config.request_timeout_duration())
                .await
            {
                Ok(resp) if resp.is_success() => resp
                    .json::<EgressCheckReply>()
                    .map(|reply| reply.is_tor)
                    .unwrap_or(false),
                Ok(resp) => {
                    warn!(status = resp.status, "Egress check returned non-success");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "Egress check request failed");
                    false
                }
            };

            self.verified
                .write()
                .expect("verification cache lock")
                .insert(proxy_url.clone(), ok);

            if !ok {
                return Err(SearchError::Config(format!(
                    "refusing to send unprotected traffic: egress via {proxy_url} is not anonymized"
                )));
            }
            debug!(proxy = %proxy_url, "Anonymized egress verified");
        }
        Ok(())
    }

    /// Closes every cached handle; used at process shutdown.
    pub fn close_all(&self) {
        let handles = self.handles.read().expect("handle cache lock");
        for handle in handles.values() {
            handle.close();
        }
    }

    /// Number of cached handles.
    pub fn handle_count(&self) -> usize {
        self.handles.read().expect("handle cache lock").len()
    }
}

#[async_trait]
impl TransportSource for TransportPool {
    async fn next_transport(&self) -> Result<Arc<dyn Transport>> {
        let binding = self.next_binding();
        let handle = self.acquire(&binding).await?;
        Ok(handle)
    }
}
