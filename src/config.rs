//! Configuration surface consumed by the transport, resilience and
//! orchestration layers.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::egress::ProxyBinding;
use crate::resilience::RetryPolicy;

/// Proxy configuration: a single URL applied to all traffic, or a map of
/// pattern -> one-or-many proxy URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxiesConfig {
    /// One proxy URL for everything (pattern "all://").
    Single(String),
    /// Pattern -> proxy URL(s).
    Map(BTreeMap<String, OneOrMany>),
}

/// A single string or a list of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Flattens into a vector.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

impl ProxiesConfig {
    /// Converts into ordered proxy bindings for the endpoint pool.
    pub fn into_bindings(self) -> Vec<ProxyBinding> {
        match self {
            Self::Single(url) => vec![ProxyBinding::single("all://", url)],
            Self::Map(map) => map
                .into_iter()
                .map(|(pattern, urls)| ProxyBinding::cycle(pattern, urls.into_vec()))
                .collect(),
        }
    }
}

/// Outbound transport and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Default per-call timeout in seconds.
    pub request_timeout: f64,
    /// Maximum redirects followed per request.
    pub max_redirects: usize,
    /// Retries on qualifying failures (total attempts = retries + 1).
    pub retries: u32,
    /// Retry strategy.
    pub retry_strategy: RetryPolicy,
    /// Maximum idle pooled connections per host.
    pub pool_connections: usize,
    /// Keep-alive expiry for pooled connections, in seconds.
    pub pool_keepalive: f64,
    /// Proxy configuration.
    pub proxies: Option<ProxiesConfig>,
    /// Local source addresses: single address, list, or IPv4 CIDR block.
    pub source_addresses: Option<OneOrMany>,
    /// Whether egress must be anonymized; triggers a one-time verification
    /// call per proxy identity.
    pub using_anonymized_egress: bool,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
    /// HTTP statuses retried as soft failures; the last soft response is
    /// accepted when retries run out.
    pub soft_retry_statuses: Vec<u16>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            request_timeout: 3.0,
            max_redirects: 30,
            retries: 0,
            retry_strategy: RetryPolicy::WholeOperation,
            pool_connections: 100,
            pool_keepalive: 5.0,
            proxies: None,
            source_addresses: None,
            using_anonymized_egress: false,
            verify_tls: true,
            soft_retry_statuses: Vec::new(),
        }
    }
}

impl OutboundConfig {
    /// Default per-call timeout as a duration.
    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout)
    }

    /// Keep-alive expiry as a duration.
    pub fn pool_keepalive_duration(&self) -> Duration {
        Duration::from_secs_f64(self.pool_keepalive)
    }

    /// Source address specs as a flat list.
    pub fn source_address_specs(&self) -> Vec<String> {
        self.source_addresses
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }
}

/// Circuit breaker ban timing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BanPolicy {
    /// Base suspend duration in seconds for generic failures.
    pub ban_time_on_fail: f64,
    /// Upper bound for the formula-derived suspend duration, in seconds.
    pub max_ban_time_on_fail: f64,
}

impl Default for BanPolicy {
    fn default() -> Self {
        Self {
            ban_time_on_fail: 5.0,
            max_ban_time_on_fail: 120.0,
        }
    }
}

/// Ordering/grouping heuristics for the finalized result list.
///
/// The defaults are presentation heuristics inherited from the reference
/// behavior; treat them as tunables, not derived values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Items spliced into one group beyond its opener.
    pub max_group_size: usize,
    /// Maximum distance between a group's insertion point and the current
    /// output length for splicing to apply.
    pub max_distance: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            max_group_size: 8,
            max_distance: 20,
        }
    }
}

/// Top-level search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Global per-query timeout in seconds; each engine's deadline is the
    /// minimum of this and its own timeout.
    pub global_timeout: f64,
    /// Outbound transport configuration.
    pub outbound: OutboundConfig,
    /// Circuit breaker ban timing.
    pub ban: BanPolicy,
    /// Result grouping heuristics.
    pub grouping: GroupingConfig,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            global_timeout: 10.0,
            outbound: OutboundConfig::default(),
            ban: BanPolicy::default(),
            grouping: GroupingConfig::default(),
        }
    }
}

impl SearchSettings {
    /// Global timeout as a duration.
    pub fn global_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.global_timeout)
    }
}
