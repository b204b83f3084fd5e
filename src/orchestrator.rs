//! Query orchestration: engine selection, parallel fan-out under a global
//! deadline, breaker gating and response assembly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::breaker::BreakerRegistry;
use crate::config::SearchSettings;
use crate::container::{EngineTiming, ResultContainer, UnresponsiveEngine};
use crate::engine::{Engine, EngineRegistry};
use crate::resilience::{DeadlineBudget, ResilienceContext, ResilienceOptions};
use crate::result::{Answer, Infobox, MergedResult};
use crate::transport::{TransportPool, TransportSource};
use crate::{Result, SearchError, SearchQuery};

/// Finalized response for one query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// The original search terms.
    pub query: String,
    /// Merged results in final presentation order.
    pub results: Vec<MergedResult>,
    /// Direct answers.
    pub answers: Vec<Answer>,
    /// Query suggestions.
    pub suggestions: Vec<String>,
    /// Spelling corrections.
    pub corrections: Vec<String>,
    /// Merged infoboxes.
    pub infoboxes: Vec<Infobox>,
    /// Mean of the backends' reported total result counts.
    pub number_of_results: Option<u64>,
    /// Per-engine timings.
    pub timings: Vec<EngineTiming>,
    /// Engines that produced no results.
    pub unresponsive: Vec<UnresponsiveEngine>,
    /// Wall-clock time for the whole query.
    pub duration: Duration,
}

/// Drives one query across all selected engines in parallel, tolerating
/// partial failure: any engine may miss the deadline or error without
/// affecting the others' results.
pub struct SearchOrchestrator {
    registry: EngineRegistry,
    breaker: Arc<BreakerRegistry>,
    source: Arc<dyn TransportSource>,
    settings: SearchSettings,
}

impl SearchOrchestrator {
    /// Creates an orchestrator backed by a real transport pool built from
    /// the settings.
    pub fn new(registry: EngineRegistry, settings: SearchSettings) -> Result<Self> {
        let pool = TransportPool::new(settings.outbound.clone())?;
        Ok(Self::with_transport_source(
            registry,
            settings,
            Arc::new(pool),
        ))
    }

    /// Creates an orchestrator over an explicit transport source.
    pub fn with_transport_source(
        registry: EngineRegistry,
        settings: SearchSettings,
        source: Arc<dyn TransportSource>,
    ) -> Self {
        let breaker = Arc::new(BreakerRegistry::with_policy(settings.ban));
        Self {
            registry,
            breaker,
            source,
            settings,
        }
    }

    /// The breaker registry, for diagnostics.
    pub fn breaker(&self) -> &Arc<BreakerRegistry> {
        &self.breaker
    }

    /// The engine registry.
    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    fn resilience_options(&self) -> ResilienceOptions {
        let outbound = &self.settings.outbound;
        ResilienceOptions {
            retries: outbound.retries,
            policy: outbound.retry_strategy,
            soft_retry_statuses: outbound.soft_retry_statuses.clone(),
            request_timeout: Some(outbound.request_timeout_duration()),
        }
    }

    /// Runs each engine's one-time `init` hook inside its own resilience
    /// context. An engine whose init fails is logged and left registered;
    /// its first real call will trip the breaker if the failure persists.
    pub async fn initialize_engines(&self) -> Result<()> {
        for engine in self.registry.engines() {
            let budget = DeadlineBudget::new(engine.descriptor().timeout_duration());
            let mut ctx = ResilienceContext::acquire(
                Arc::clone(&self.source),
                budget,
                self.resilience_options(),
            )
            .await?;
            if let Err(e) = engine.init(&mut ctx).await {
                warn!(engine = %engine.name(), error = %e, "Engine initialization failed");
            }
        }
        Ok(())
    }

    /// Engines that will serve this query: enabled, matching the explicit
    /// engine list or the query's categories, and capable of the query's
    /// paging/time-range demands.
    fn select_engines(&self, query: &SearchQuery) -> Vec<Arc<dyn Engine>> {
        self.registry
            .engines()
            .iter()
            .filter(|e| e.is_enabled())
            .filter(|e| {
                if query.engines.is_empty() {
                    e.descriptor().categories.contains(&query.category)
                } else {
                    query
                        .engines
                        .iter()
                        .any(|s| s == e.shortcut() || s == e.name())
                }
            })
            .filter(|e| e.descriptor().can_serve(query))
            .cloned()
            .collect()
    }

    /// Executes one query end to end.
    ///
    /// Every selected engine runs as its own task under a per-engine
    /// deadline; the whole fan-out is cut off at the global timeout.
    /// Stragglers keep running but their results are dropped at the
    /// container's close barrier.
    pub async fn search(&self, query: SearchQuery) -> Result<SearchResponse> {
        if query.query.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "query must not be empty".into(),
            ));
        }
        if self.registry.is_empty() {
            return Err(SearchError::NoEngines);
        }

        let selected = self.select_engines(&query);
        if selected.is_empty() {
            return Err(SearchError::NoEngines);
        }

        let started = Instant::now();
        let global = self.settings.global_timeout_duration();
        let container = Arc::new(ResultContainer::with_grouping(
            self.registry.weights(),
            self.settings.grouping,
        ));
        let deadline_passed = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(selected.len());
        for engine in selected {
            let identity = engine.descriptor().identity().to_string();
            if self.breaker.is_suspended(&identity) {
                let reason = self
                    .breaker
                    .last_reason(&identity)
                    .unwrap_or_else(|| "suspended".into());
                debug!(engine = %engine.name(), reason = %reason, "Engine suspended, skipping");
                container.add_unresponsive(engine.name(), &reason, true);
                continue;
            }

            let budget = engine.descriptor().timeout_duration().min(global);
            handles.push(tokio::spawn(run_engine(
                engine,
                query.clone(),
                Arc::clone(&self.source),
                Arc::clone(&self.breaker),
                Arc::clone(&container),
                self.resilience_options(),
                budget,
                Arc::clone(&deadline_passed),
            )));
        }

        let engine_count = handles.len();
        if tokio::time::timeout(global, futures::future::join_all(handles))
            .await
            .is_err()
        {
            deadline_passed.store(true, Ordering::SeqCst);
            debug!("Global deadline reached with engines still in flight");
        }

        container.close();
        let results = container.ordered_results()?;
        let duration = started.elapsed();
        info!(
            query = %query.query,
            engines = engine_count,
            results = results.len(),
            duration_ms = duration.as_millis() as u64,
            "Search completed"
        );

        Ok(SearchResponse {
            query: query.query,
            results,
            answers: container.answers(),
            suggestions: container.suggestions(),
            corrections: container.corrections(),
            infoboxes: container.infoboxes(),
            number_of_results: container.number_of_results(),
            timings: container.timings(),
            unresponsive: container.unresponsive(),
            duration,
        })
    }
}

/// One engine's full call: build the request, send it under the retry
/// policy, parse, merge. Runs as its own task.
#[allow(clippy::too_many_arguments)]
async fn run_engine(
    engine: Arc<dyn Engine>,
    query: SearchQuery,
    source: Arc<dyn TransportSource>,
    breaker: Arc<BreakerRegistry>,
    container: Arc<ResultContainer>,
    opts: ResilienceOptions,
    budget: Duration,
    deadline_passed: Arc<AtomicBool>,
) {
    let name = engine.name().to_string();
    let identity = engine.descriptor().identity().to_string();
    let category = engine
        .descriptor()
        .categories
        .first()
        .copied()
        .unwrap_or_default();
    let started = Instant::now();

    let mut ctx =
        match ResilienceContext::acquire(source, DeadlineBudget::new(budget), opts).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(engine = %name, error = %e, "Failed to acquire transport");
                container.add_unresponsive(&name, e.kind(), false);
                return;
            }
        };

    let op_engine = Arc::clone(&engine);
    let op_query = query.clone();
    let sent = ctx
        .run(move |ctx| {
            let engine = Arc::clone(&op_engine);
            let query = op_query.clone();
            Box::pin(async move {
                let spec = engine.build_request(&query)?;
                ctx.send(&spec, None).await
            })
        })
        .await;

    match sent {
        Ok(response) => {
            breaker.report_success(&identity);
            if deadline_passed.load(Ordering::SeqCst) {
                debug!(engine = %name, "Response arrived after the global deadline, dropping");
                return;
            }
            match engine.parse_response(&response) {
                Ok(entries) => {
                    container.extend(&name, category, entries);
                    container.add_timing(EngineTiming {
                        engine: name,
                        total: started.elapsed(),
                        network: ctx.network_time(),
                    });
                }
                Err(e) => {
                    warn!(engine = %name, error = %e, "Failed to parse response");
                    container.add_timing(EngineTiming {
                        engine: name.clone(),
                        total: started.elapsed(),
                        network: ctx.network_time(),
                    });
                    container.add_unresponsive(&name, e.kind(), false);
                }
            }
        }
        Err(e) => {
            if e.is_suspending() {
                breaker.report_failure(&identity, &e);
            }
            debug!(engine = %name, error = %e, "Engine call failed");
            container.add_timing(EngineTiming {
                engine: name.clone(),
                total: started.elapsed(),
                network: ctx.network_time(),
            });
            container.add_unresponsive(&name, e.kind(), false);
        }
    }
}
