//! End-to-end search flow over a scripted transport: fan-out, merging,
//! scoring, breaker behavior and deadline enforcement through the public API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use searchmux::{
    Engine, EngineDescriptor, EngineRegistry, HitResult, RawResponse, RequestSpec, Result,
    ResultEntry, SearchError, SearchOrchestrator, SearchQuery, SearchSettings, Transport,
    TransportSource,
};

/// Engine that turns the canned JSON body into hits.
struct JsonEngine {
    descriptor: EngineDescriptor,
}

impl JsonEngine {
    fn new(name: &str) -> Self {
        Self {
            descriptor: EngineDescriptor {
                name: name.to_string(),
                shortcut: name.to_string(),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl Engine for JsonEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn build_request(&self, query: &SearchQuery) -> Result<RequestSpec> {
        Ok(RequestSpec::get(format!("https://{}.example.com/search", self.descriptor.name))
            .param("q", &query.query))
    }

    fn parse_response(&self, response: &RawResponse) -> Result<Vec<ResultEntry>> {
        let items: Vec<serde_json::Value> = response.json()?;
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let url = item["url"].as_str()?.to_string();
                let title = item["title"].as_str()?.to_string();
                let content = item["content"].as_str().unwrap_or_default().to_string();
                Some(ResultEntry::Hit(HitResult::new(url, title, content)))
            })
            .collect())
    }
}

/// Transport answering each host with its scripted body.
struct RoutedTransport {
    routes: HashMap<String, (u16, String)>,
}

impl RoutedTransport {
    fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    fn route(mut self, host_prefix: &str, status: u16, body: &str) -> Self {
        self.routes
            .insert(host_prefix.to_string(), (status, body.to_string()));
        self
    }
}

#[async_trait]
impl Transport for RoutedTransport {
    async fn send(&self, spec: &RequestSpec, _timeout: Duration) -> Result<RawResponse> {
        let (status, body) = self
            .routes
            .iter()
            .find(|(host, _)| spec.url.contains(host.as_str()))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| SearchError::Transport("no route".into()))?;
        Ok(RawResponse {
            status,
            url: spec.url.clone(),
            headers: HashMap::new(),
            body,
        })
    }
}

struct RoutedSource(Arc<RoutedTransport>);

#[async_trait]
impl TransportSource for RoutedSource {
    async fn next_transport(&self) -> Result<Arc<dyn Transport>> {
        Ok(Arc::clone(&self.0) as Arc<dyn Transport>)
    }
}

fn orchestrator(engines: Vec<JsonEngine>, transport: RoutedTransport) -> SearchOrchestrator {
    let mut registry = EngineRegistry::new();
    for engine in engines {
        registry.register(engine);
    }
    SearchOrchestrator::with_transport_source(
        registry,
        SearchSettings::default(),
        Arc::new(RoutedSource(Arc::new(transport))),
    )
}

#[tokio::test]
async fn two_engines_agree_on_one_result() {
    let transport = RoutedTransport::new()
        .route(
            "a.example.com",
            200,
            r#"[{"url": "https://e.com/1", "title": "Cats", "content": "about cats"}]"#,
        )
        .route(
            "b.example.com",
            200,
            r#"[{"url": "http://e.com/1", "title": "Cats - Wikipedia", "content": "about cats"}]"#,
        );
    let orchestrator = orchestrator(vec![JsonEngine::new("a"), JsonEngine::new("b")], transport);

    let response = orchestrator.search(SearchQuery::new("cats")).await.unwrap();

    assert_eq!(response.results.len(), 1);
    let merged = &response.results[0];
    assert_eq!(merged.url, "https://e.com/1");
    assert_eq!(merged.title, "Cats - Wikipedia");
    assert_eq!(merged.positions, vec![1, 1]);
    assert!(merged.engines.contains("a"));
    assert!(merged.engines.contains("b"));
    assert!((merged.score - 4.0).abs() < 1e-9);
    assert_eq!(response.timings.len(), 2);
    assert!(response.unresponsive.is_empty());
}

#[tokio::test]
async fn one_backend_failing_does_not_block_the_other() {
    let transport = RoutedTransport::new()
        .route(
            "a.example.com",
            200,
            r#"[{"url": "https://only.com", "title": "Only", "content": ""}]"#,
        )
        .route("b.example.com", 429, "slow down");
    let orchestrator = orchestrator(vec![JsonEngine::new("a"), JsonEngine::new("b")], transport);

    let response = orchestrator.search(SearchQuery::new("cats")).await.unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].url, "https://only.com");
    assert_eq!(response.unresponsive.len(), 1);
    assert_eq!(response.unresponsive[0].engine, "b");
    assert_eq!(response.unresponsive[0].reason, "rate_limited");
    assert!(orchestrator.breaker().is_suspended("b"));
    // Both engines report timings, including the failed one.
    assert_eq!(response.timings.len(), 2);
}

#[tokio::test]
async fn suspended_backend_is_skipped_on_the_next_query() {
    let transport = RoutedTransport::new()
        .route(
            "a.example.com",
            200,
            r#"[{"url": "https://ok.com", "title": "Ok", "content": ""}]"#,
        )
        .route("b.example.com", 403, "solve this CAPTCHA to continue");
    let orchestrator = orchestrator(vec![JsonEngine::new("a"), JsonEngine::new("b")], transport);

    let first = orchestrator.search(SearchQuery::new("cats")).await.unwrap();
    assert_eq!(first.unresponsive.len(), 1);
    assert!(!first.unresponsive[0].suspended);
    assert_eq!(first.unresponsive[0].reason, "captcha");

    // The captcha suspension is long-lived, so the second query skips b
    // without calling it.
    let second = orchestrator.search(SearchQuery::new("dogs")).await.unwrap();
    let skipped = second
        .unresponsive
        .iter()
        .find(|u| u.engine == "b")
        .unwrap();
    assert!(skipped.suspended);
    assert_eq!(second.results.len(), 1);
}

#[tokio::test]
async fn answers_and_suggestions_flow_through() {
    struct ExtrasEngine {
        descriptor: EngineDescriptor,
    }

    #[async_trait]
    impl Engine for ExtrasEngine {
        fn descriptor(&self) -> &EngineDescriptor {
            &self.descriptor
        }

        fn build_request(&self, _query: &SearchQuery) -> Result<RequestSpec> {
            Ok(RequestSpec::get("https://x.example.com/search"))
        }

        fn parse_response(&self, _response: &RawResponse) -> Result<Vec<ResultEntry>> {
            Ok(vec![
                ResultEntry::Suggestion("rust language".into()),
                ResultEntry::NumberOfResults(1200),
            ])
        }
    }

    let mut registry = EngineRegistry::new();
    registry.register(ExtrasEngine {
        descriptor: EngineDescriptor {
            name: "x".into(),
            shortcut: "x".into(),
            ..Default::default()
        },
    });
    let transport = RoutedTransport::new().route("x.example.com", 200, "ok");
    let orchestrator = SearchOrchestrator::with_transport_source(
        registry,
        SearchSettings::default(),
        Arc::new(RoutedSource(Arc::new(transport))),
    );

    let response = orchestrator.search(SearchQuery::new("rust")).await.unwrap();
    assert_eq!(response.suggestions, vec!["rust language".to_string()]);
    assert_eq!(response.number_of_results, Some(1200));
}
