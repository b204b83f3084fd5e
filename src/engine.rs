//! Engine adapter contract: capability descriptor, request/response types
//! and the trait each backend implements.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::resilience::ResilienceContext;
use crate::result::{ResultEntry, Template};
use crate::{Result, SearchQuery};

/// Categories for search engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineCategory {
    #[default]
    General,
    Images,
    Videos,
    News,
    Maps,
    Music,
    Files,
    Science,
    Social,
}

/// Static capability descriptor for a search engine, loaded at startup
/// and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDescriptor {
    /// Display name of the engine.
    pub name: String,
    /// Short identifier (e.g., "ddg" for DuckDuckGo).
    pub shortcut: String,
    /// Categories this engine belongs to.
    pub categories: Vec<EngineCategory>,
    /// Weight for ranking (higher = more influence).
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Whether the engine is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Whether pagination is supported.
    #[serde(default)]
    pub paging: bool,
    /// Maximum page the engine will serve.
    #[serde(default = "default_max_page")]
    pub max_page: u32,
    /// Whether time range filtering is supported.
    #[serde(default)]
    pub time_range_support: bool,
    /// Declared result template kind.
    #[serde(default)]
    pub template: Template,
    /// Circuit breaker identity; engines sharing a transport configuration
    /// may share one. Defaults to the engine name.
    #[serde(default)]
    pub resilience_identity: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_timeout() -> f64 {
    3.0
}

fn default_enabled() -> bool {
    true
}

fn default_max_page() -> u32 {
    10
}

impl Default for EngineDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            shortcut: String::new(),
            categories: vec![EngineCategory::General],
            weight: 1.0,
            timeout: 3.0,
            enabled: true,
            paging: false,
            max_page: 10,
            time_range_support: false,
            template: Template::Default,
            resilience_identity: None,
        }
    }
}

impl EngineDescriptor {
    /// The circuit breaker identity for this engine.
    pub fn identity(&self) -> &str {
        self.resilience_identity.as_deref().unwrap_or(&self.name)
    }

    /// Engine timeout as a duration.
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// Whether this engine can serve the given query at all
    /// (paging and time-range capability checks).
    pub fn can_serve(&self, query: &SearchQuery) -> bool {
        if query.page > 1 && (!self.paging || query.page > self.max_page) {
            return false;
        }
        if query.time_range.is_some() && !self.time_range_support {
            return false;
        }
        true
    }
}

/// HTTP method for an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Body of an outbound request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Form-urlencoded fields.
    Form(HashMap<String, String>),
    /// JSON payload.
    Json(serde_json::Value),
}

/// An outbound request built by an engine adapter.
///
/// The orchestrator never inspects backend-specific formats; adapters
/// describe the exchange with this spec and the transport layer executes it.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// Request URL.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Query parameters appended to the URL.
    pub params: Vec<(String, String)>,
    /// Optional body.
    pub body: Option<RequestBody>,
}

impl RequestSpec {
    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            params: Vec::new(),
            body: None,
        }
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: Vec::new(),
            params: Vec::new(),
            body: None,
        }
    }

    /// Adds a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Adds a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Sets a form body.
    pub fn form(mut self, data: HashMap<String, String>) -> Self {
        self.body = Some(RequestBody::Form(data));
        self
    }

    /// Sets a JSON body.
    pub fn json(mut self, data: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(data));
        self
    }
}

/// Raw response handed to an adapter's parser.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| crate::SearchError::Parse(e.to_string()))
    }

    /// Heuristic detection of a challenge page in the body.
    pub fn is_captcha(&self) -> bool {
        use std::sync::OnceLock;
        static CHALLENGE: OnceLock<regex::Regex> = OnceLock::new();
        let re = CHALLENGE.get_or_init(|| {
            regex::Regex::new(r"(?i)captcha|unusual traffic|are you a robot|automated requests")
                .expect("valid challenge regex")
        });
        re.is_match(&self.body)
    }
}

/// Trait for implementing search engine adapters.
///
/// Each backend implements a static descriptor plus two pure functions:
/// `build_request` produces the outbound request for a query and
/// `parse_response` interprets the backend's bespoke response format.
/// The optional `init` hook runs once at startup inside a resilience
/// context.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Returns the engine descriptor.
    fn descriptor(&self) -> &EngineDescriptor;

    /// Builds the outbound request for a query.
    fn build_request(&self, query: &SearchQuery) -> Result<RequestSpec>;

    /// Parses a raw response into result entries.
    fn parse_response(&self, response: &RawResponse) -> Result<Vec<ResultEntry>>;

    /// Optional one-time initialization (e.g. fetching a token).
    async fn init(&self, _ctx: &mut ResilienceContext) -> Result<()> {
        Ok(())
    }

    /// Returns the engine name.
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Returns the engine shortcut.
    fn shortcut(&self) -> &str {
        &self.descriptor().shortcut
    }

    /// Returns the engine weight.
    fn weight(&self) -> f64 {
        self.descriptor().weight
    }

    /// Returns whether the engine is enabled.
    fn is_enabled(&self) -> bool {
        self.descriptor().enabled
    }
}

/// Lookup table of registered engines, built at startup.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn Engine>>,
    by_shortcut: HashMap<String, usize>,
}

impl EngineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an engine. Duplicate shortcuts are rejected with a warning.
    pub fn register<E: Engine + 'static>(&mut self, engine: E) {
        let shortcut = engine.shortcut().to_string();
        if self.by_shortcut.contains_key(&shortcut) {
            warn!(shortcut = %shortcut, "Duplicate engine shortcut, skipping registration");
            return;
        }
        self.by_shortcut.insert(shortcut, self.engines.len());
        self.engines.push(Arc::new(engine));
    }

    /// Looks up an engine by shortcut.
    pub fn get(&self, shortcut: &str) -> Option<&Arc<dyn Engine>> {
        self.by_shortcut.get(shortcut).map(|&i| &self.engines[i])
    }

    /// All registered engines in registration order.
    pub fn engines(&self) -> &[Arc<dyn Engine>] {
        &self.engines
    }

    /// Number of registered engines.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Engine weights keyed by name, snapshotted for the aggregator.
    pub fn weights(&self) -> HashMap<String, f64> {
        self.engines
            .iter()
            .map(|e| (e.name().to_string(), e.weight()))
            .collect()
    }
}
