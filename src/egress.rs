//! Rotating egress identities: proxy bindings and local source addresses.
//!
//! The endpoint pool owns an ordered, cyclic sequence of proxy-pattern
//! bindings and a cyclic sequence of local source addresses. `next()`
//! advances an atomic cursor deterministically and wraps, so concurrent
//! callers each receive a distinct rotation without coordination.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Result, SearchError};

/// One proxy binding: a URL pattern (e.g. "all://", "https://") mapped to
/// one or more proxy URLs cycled per rotation step.
#[derive(Debug, Clone)]
pub struct ProxyBinding {
    /// Pattern the proxy applies to.
    pub pattern: String,
    /// Candidate proxy URLs, cycled in order.
    pub urls: Vec<String>,
}

impl ProxyBinding {
    /// Creates a binding with a single proxy URL.
    pub fn single(pattern: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            urls: vec![url.into()],
        }
    }

    /// Creates a binding cycling over several proxy URLs.
    pub fn cycle(pattern: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            pattern: pattern.into(),
            urls,
        }
    }
}

/// One concrete egress selection: the proxy URL chosen for each pattern
/// and the local source address to bind, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressSelection {
    /// Pattern -> chosen proxy URL.
    pub proxies: BTreeMap<String, String>,
    /// Local address to bind outbound sockets to.
    pub source_address: Option<IpAddr>,
}

impl EgressSelection {
    /// A selection with no proxies and no bound source address.
    pub fn direct() -> Self {
        Self {
            proxies: BTreeMap::new(),
            source_address: None,
        }
    }
}

/// Expands a source address specification into concrete addresses.
///
/// Accepts a single address ("192.168.0.1", "::1") or an IPv4 CIDR block
/// ("192.168.0.0/30"), in which case every host address in the block is
/// produced.
pub fn expand_source_address(spec: &str) -> Result<Vec<IpAddr>> {
    match spec.split_once('/') {
        None => {
            let addr: IpAddr = spec
                .parse()
                .map_err(|_| SearchError::Config(format!("invalid source address: {spec}")))?;
            Ok(vec![addr])
        }
        Some((base, prefix)) => {
            let base: Ipv4Addr = base.parse().map_err(|_| {
                SearchError::Config(format!("CIDR expansion requires an IPv4 base: {spec}"))
            })?;
            let prefix: u32 = prefix
                .parse()
                .ok()
                .filter(|p| *p <= 32)
                .ok_or_else(|| SearchError::Config(format!("invalid CIDR prefix: {spec}")))?;

            let base = u32::from(base);
            let host_bits = 32 - prefix;
            let network = if host_bits == 32 { 0 } else { base >> host_bits << host_bits };
            let count = 1u64 << host_bits;

            // /31 and /32 have no network/broadcast addresses to exclude.
            let (skip_first, skip_last) = if host_bits <= 1 { (0, 0) } else { (1, 1) };

            let mut addrs = Vec::new();
            for offset in skip_first..count.saturating_sub(skip_last) {
                addrs.push(IpAddr::V4(Ipv4Addr::from(network + offset as u32)));
            }
            if addrs.is_empty() {
                return Err(SearchError::Config(format!(
                    "CIDR block has no host addresses: {spec}"
                )));
            }
            Ok(addrs)
        }
    }
}

/// A pool of rotating (proxy, source-address) combinations.
///
/// Shared read access; the cursor advance is a single atomic increment,
/// safe under concurrent callers.
#[derive(Debug, Default)]
pub struct EndpointPool {
    proxy_bindings: Vec<ProxyBinding>,
    source_addresses: Vec<IpAddr>,
    cursor: AtomicUsize,
}

impl EndpointPool {
    /// Creates an empty pool: every selection is direct.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool from proxy bindings and source address specs.
    pub fn with_bindings(
        proxy_bindings: Vec<ProxyBinding>,
        source_specs: &[String],
    ) -> Result<Self> {
        let mut source_addresses = Vec::new();
        for spec in source_specs {
            source_addresses.extend(expand_source_address(spec)?);
        }
        Ok(Self {
            proxy_bindings,
            source_addresses,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Whether any rotation is configured.
    pub fn is_rotating(&self) -> bool {
        self.proxy_bindings.iter().any(|b| b.urls.len() > 1) || self.source_addresses.len() > 1
    }

    /// Number of configured source addresses.
    pub fn source_address_count(&self) -> usize {
        self.source_addresses.len()
    }

    /// All distinct proxy URLs across bindings, for one-time verification.
    pub fn all_proxy_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .proxy_bindings
            .iter()
            .flat_map(|b| b.urls.iter().cloned())
            .collect();
        urls.sort();
        urls.dedup();
        urls
    }

    /// Advances the cursor and returns the next egress selection.
    pub fn next(&self) -> EgressSelection {
        let step = self.cursor.fetch_add(1, Ordering::SeqCst);

        let mut proxies = BTreeMap::new();
        for binding in &self.proxy_bindings {
            if binding.urls.is_empty() {
                continue;
            }
            let url = binding.urls[step % binding.urls.len()].clone();
            proxies.insert(binding.pattern.clone(), url);
        }

        let source_address = if self.source_addresses.is_empty() {
            None
        } else {
            Some(self.source_addresses[step % self.source_addresses.len()])
        };

        EgressSelection {
            proxies,
            source_address,
        }
    }
}
