//! # searchmux
//!
//! A meta search orchestration library inspired by SearXNG.
//!
//! This library fans a query out to many search backends in parallel and
//! assembles one merged, ranked response, with:
//!
//! - A hard per-query time budget that every outbound call shrinks against
//! - Per-backend circuit breakers that suspend misbehaving engines
//! - Rotating egress bindings (proxies and source addresses) with retries
//! - Result deduplication, scoring and category-aware ordering
//!
//! ## Example
//!
//! ```rust,no_run
//! use searchmux::{EngineRegistry, SearchOrchestrator, SearchQuery, SearchSettings};
//! # use searchmux::{Engine, EngineDescriptor, RawResponse, RequestSpec, ResultEntry};
//! # struct MyEngine { descriptor: EngineDescriptor }
//! # #[async_trait::async_trait]
//! # impl Engine for MyEngine {
//! #     fn descriptor(&self) -> &EngineDescriptor { &self.descriptor }
//! #     fn build_request(&self, _q: &SearchQuery) -> searchmux::Result<RequestSpec> {
//! #         Ok(RequestSpec::get("https://example.com"))
//! #     }
//! #     fn parse_response(&self, _r: &RawResponse) -> searchmux::Result<Vec<ResultEntry>> {
//! #         Ok(vec![])
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = EngineRegistry::new();
//!     registry.register(MyEngine { descriptor: EngineDescriptor::default() });
//!
//!     let orchestrator = SearchOrchestrator::new(registry, SearchSettings::default())?;
//!     let response = orchestrator.search(SearchQuery::new("rust programming")).await?;
//!
//!     for result in &response.results {
//!         println!("{}: {}", result.title, result.url);
//!     }
//!     Ok(())
//! }
//! ```

mod breaker;
mod config;
mod container;
mod egress;
mod engine;
mod error;
mod orchestrator;
mod query;
mod resilience;
mod result;
mod transport;

pub use breaker::{BreakerRegistry, BreakerStatus};
pub use config::{
    BanPolicy, GroupingConfig, OneOrMany, OutboundConfig, ProxiesConfig, SearchSettings,
};
pub use container::{EngineTiming, ResultContainer, UnresponsiveEngine};
pub use egress::{EgressSelection, EndpointPool, ProxyBinding};
pub use engine::{
    Engine, EngineCategory, EngineDescriptor, EngineRegistry, HttpMethod, RawResponse,
    RequestBody, RequestSpec,
};
pub use error::{Result, SearchError};
pub use orchestrator::{SearchOrchestrator, SearchResponse};
pub use query::{SafeSearch, SearchQuery, TimeRange};
pub use resilience::{
    DeadlineBudget, ResilienceContext, ResilienceOptions, RetryPolicy, SendOutcome,
};
pub use result::{
    Answer, HitResult, Infobox, MergedResult, Payload, Priority, ResultEntry, Template,
};
pub use transport::{Transport, TransportHandle, TransportPool, TransportSource};
