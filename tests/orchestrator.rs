mod support;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_analysis_orchestrator::agent::Orchestrator;
use market_analysis_orchestrator::analysis::{HeuristicAnalyzer, LlmAnalyzer};
use market_analysis_orchestrator::audit::verify_fingerprint;
use market_analysis_orchestrator::config::{ContextOperation, EngineSettings};
use market_analysis_orchestrator::error::StepErrorKind;
use market_analysis_orchestrator::planner::{LlmPlanner, Planner};
use market_analysis_orchestrator::state::{InMemorySessionStore, SessionStore};
use market_analysis_orchestrator::synthesis::AggregateSynthesizer;
use market_analysis_orchestrator::{
    FinalSummary, OrchestrationError, PlanSource, Result, Sentiment, Session, SessionRequest,
    SessionStatus, StepOutcome,
};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use support::{
    manager, price_payload, price_plan, settings, FakeFactory, FixedPlanner, Reply,
    ScriptedModel,
};
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn orchestrator(
    factory: Arc<FakeFactory>,
    providers: &[&str],
    planner: Box<dyn Planner>,
    settings: EngineSettings,
) -> Orchestrator {
    Orchestrator::new(
        manager(factory, providers),
        planner,
        Box::new(HeuristicAnalyzer),
        Box::new(AggregateSynthesizer),
        Arc::new(InMemorySessionStore::new()),
        settings,
    )
}

fn request(query: &str, entities: &[&str]) -> SessionRequest {
    SessionRequest {
        query: query.to_string(),
        entities: entities.iter().map(|e| e.to_string()).collect(),
    }
}

fn trace_count(session: &Session, prefix: &str) -> usize {
    session
        .reasoning_trace
        .iter()
        .filter(|line| line.starts_with(prefix))
        .count()
}

fn rising_market() -> FakeFactory {
    FakeFactory::new().provider("market", &["get_price"], |_, args| {
        let coin = args["coin_id"].as_str().unwrap_or("unknown").to_string();
        Reply::Ok(price_payload(&coin, 4.0))
    })
}

#[tokio::test]
async fn test_each_step_executes_exactly_once() {
    let coins = ["bitcoin", "ethereum", "solana", "cardano", "ripple"];

    for n in [0usize, 1, 3, 5] {
        let factory = Arc::new(rising_market());
        let planner = FixedPlanner::document(price_plan(&coins[..n]));
        let orchestrator = orchestrator(factory.clone(), &["market"], planner, settings());

        let session = orchestrator
            .run(request("how are things?", &coins[..n]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.plan.len(), n);
        assert_eq!(trace_count(&session, "EXECUTE:"), n);
        assert_eq!(session.plan.completed_count(), n);
        assert_eq!(factory.calls(), n);
        assert_eq!(session.analyzed_count(), n);
        assert_eq!(session.status, SessionStatus::Completed);
    }
}

#[tokio::test]
async fn test_planner_plan_is_used_and_fingerprinted() {
    let factory = Arc::new(rising_market());
    let planner = FixedPlanner::document(price_plan(&["bitcoin", "ethereum"]));
    let orchestrator = orchestrator(factory, &["market"], planner, settings());

    let session = orchestrator
        .run(request("BTC vs ETH?", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.target_entities, vec!["bitcoin", "ethereum"]);
    assert_eq!(session.plan_source, PlanSource::Planner);
    assert!(verify_fingerprint(&session));
    assert_eq!(session.summary.sentiment, Sentiment::Bullish);
    assert_eq!(session.results.len(), 2);
    assert!(session.errors.is_empty());
}

#[tokio::test]
async fn test_failed_step_does_not_abort_session() {
    // First call breaks the pipe; the reconnect serves the second
    let served = Arc::new(AtomicUsize::new(0));
    let counter = served.clone();
    let factory = Arc::new(FakeFactory::new().provider("market", &["get_price"], move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::Broken
        } else {
            Reply::Ok(price_payload("bitcoin", 3.0))
        }
    }));

    let planner = FixedPlanner::document(price_plan(&["bitcoin", "bitcoin"]));
    let orchestrator = orchestrator(factory.clone(), &["market"], planner, settings());

    let session = orchestrator
        .run(request("bitcoin today", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.plan.completed_count(), 2);
    assert_eq!(session.analyzed_count(), 1);
    assert_eq!(session.errors.len(), 1);
    assert!(session.errors[0].starts_with("step 1 market/get_price:"));
    assert_eq!(session.status, SessionStatus::Partial);
    assert_eq!(factory.opened("market"), 2);

    match session.plan.steps()[0].result() {
        Some(StepOutcome::Failed { kind, .. }) => assert_eq!(*kind, StepErrorKind::Transport),
        other => panic!("expected failed step, got {:?}", other),
    }
    assert!(session.plan.steps()[1].result().unwrap().is_success());
    assert_eq!(session.summary.sentiment, Sentiment::Bullish);
}

#[tokio::test]
async fn test_provider_error_recorded_on_step() {
    let factory = Arc::new(FakeFactory::new().provider("market", &["get_price"], |_, _| {
        Reply::ProviderError("coin not found".to_string())
    }));
    let planner = FixedPlanner::document(price_plan(&["bitcoin"]));
    let orchestrator = orchestrator(factory.clone(), &["market"], planner, settings());

    let session = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await
        .unwrap();

    match session.plan.steps()[0].result() {
        Some(StepOutcome::Failed { kind, error, .. }) => {
            assert_eq!(*kind, StepErrorKind::Provider);
            assert!(error.contains("coin not found"));
        }
        other => panic!("expected failed step, got {:?}", other),
    }
    assert_eq!(session.analyzed_count(), 0);
    assert_eq!(session.summary, FinalSummary::neutral());
    // Provider errors leave the connection usable
    assert_eq!(factory.opened("market"), 1);
}

#[tokio::test]
async fn test_hung_step_times_out() {
    let factory = Arc::new(
        FakeFactory::new().provider("market", &["get_price"], |_, _| Reply::Hang),
    );
    let planner = FixedPlanner::document(price_plan(&["bitcoin"]));
    let orchestrator = orchestrator(factory.clone(), &["market"], planner, settings());

    let session = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await
        .unwrap();

    match session.plan.steps()[0].result() {
        Some(StepOutcome::Failed { kind, .. }) => assert_eq!(*kind, StepErrorKind::Timeout),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(session.status, SessionStatus::Partial);
    assert!(!orchestrator.manager().is_connected("market").await);
}

#[tokio::test]
async fn test_no_entities_gives_empty_fallback() {
    let factory = Arc::new(rising_market());
    let orchestrator = orchestrator(
        factory.clone(),
        &["market"],
        FixedPlanner::failing(),
        settings(),
    );

    let session = orchestrator
        .run(request("what's the market mood?", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert!(session.target_entities.is_empty());
    assert_eq!(session.plan_source, PlanSource::Fallback);
    assert!(session.plan.is_empty());
    assert_eq!(factory.calls(), 0);

    assert_eq!(session.summary.sentiment, Sentiment::Neutral);
    assert_eq!(session.summary.confidence, 0.5);
    assert!(session.summary.key_findings.is_empty());
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_invalid_planner_output_falls_back() {
    let factory = Arc::new(rising_market());
    let planner = Box::new(FixedPlanner(Ok("I think you should buy".to_string())));
    let orchestrator = orchestrator(factory, &["market"], planner, EngineSettings {
        catalog: market_only_catalog(),
        ..settings()
    });

    let session = orchestrator
        .run(request("$BTC outlook", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.plan_source, PlanSource::Fallback);
    assert_eq!(session.plan.len(), 1);
    assert_eq!(session.plan.steps()[0].target_entity, "bitcoin");
    assert_eq!(session.analyzed_count(), 1);
}

fn market_only_catalog() -> Vec<market_analysis_orchestrator::config::OperationBinding> {
    market_analysis_orchestrator::config::default_catalog()
        .into_iter()
        .filter(|b| b.provider == "market" && b.operation == "get_price")
        .collect()
}

#[tokio::test]
async fn test_model_plan_with_missing_fields_is_defaulted() {
    let factory = Arc::new(rising_market());
    let model = ScriptedModel::new(vec![Ok(
        r#"Here is the plan:
```json
{ "steps": [ { "provider": "market", "operation": "get_price", "parameters": { "coin_id": "BTC" } } ] }
```"#,
    )]);
    let orchestrator = orchestrator(
        factory,
        &["market"],
        Box::new(LlmPlanner::new(model, settings().max_plan_steps)),
        settings(),
    );

    let session = orchestrator
        .run(request("how is bitcoin?", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.plan_source, PlanSource::PlannerWithDefaults);
    assert_eq!(session.plan.priority, 3);
    let step = &session.plan.steps()[0];
    assert_eq!(step.target_entity, "bitcoin");
    assert_eq!(step.parameters["coin_id"], "bitcoin");
}

#[tokio::test]
async fn test_model_analyst_failure_degrades() {
    let factory = Arc::new(rising_market());
    let model = ScriptedModel::new(vec![Err("quota exceeded")]);
    let orchestrator = Orchestrator::new(
        manager(factory, &["market"]),
        FixedPlanner::document(price_plan(&["bitcoin"])),
        Box::new(LlmAnalyzer::new(model)),
        Box::new(AggregateSynthesizer),
        Arc::new(InMemorySessionStore::new()),
        settings(),
    );

    let session = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await
        .unwrap();

    let results: Vec<_> = session.all_results().collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].degraded);
    assert_eq!(results[0].judgment.sentiment, Sentiment::Neutral);
    assert!(session.summary.key_findings.is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_remaining_steps() {
    let cancel = CancellationToken::new();
    let factory = Arc::new(rising_market().cancel_after(2, cancel.clone()));
    let coins = ["bitcoin", "ethereum", "solana", "cardano", "ripple"];
    let planner = FixedPlanner::document(price_plan(&coins));
    let orchestrator = orchestrator(factory.clone(), &["market"], planner, settings());

    let session = orchestrator
        .run(request("majors", &coins), cancel)
        .await
        .unwrap();

    assert_eq!(factory.calls(), 2);
    assert_eq!(trace_count(&session, "EXECUTE:"), 2);
    assert_eq!(trace_count(&session, "CANCELLED:"), 1);
    assert!(session.plan.steps()[..2].iter().all(|s| s.is_completed()));
    assert!(session.plan.steps()[2..].iter().all(|s| !s.is_completed()));

    // The step in flight when cancellation arrived is still analyzed
    assert_eq!(session.analyzed_count(), 2);
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert_eq!(session.summary.sentiment, Sentiment::Bullish);
}

#[tokio::test]
async fn test_cancellation_during_last_step_marks_session_cancelled() {
    let cancel = CancellationToken::new();
    let factory = Arc::new(rising_market().cancel_after(2, cancel.clone()));
    let coins = ["bitcoin", "ethereum"];
    let planner = FixedPlanner::document(price_plan(&coins));
    let orchestrator = orchestrator(factory.clone(), &["market"], planner, settings());

    let session = orchestrator
        .run(request("majors", &coins), cancel)
        .await
        .unwrap();

    // Every step ran; nothing was skipped
    assert_eq!(factory.calls(), 2);
    assert_eq!(trace_count(&session, "CANCELLED:"), 0);
    assert!(session.plan.steps().iter().all(|s| s.is_completed()));
    assert_eq!(session.analyzed_count(), 2);
    assert_eq!(session.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_no_reachable_provider_is_fatal() {
    // Nothing registered: every open fails
    let factory = Arc::new(FakeFactory::new());
    let orchestrator = orchestrator(
        factory,
        &["market", "news"],
        FixedPlanner::document(price_plan(&["bitcoin"])),
        settings(),
    );

    let result = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(OrchestrationError::NoProvidersAvailable(_))
    ));
}

#[tokio::test]
async fn test_no_configured_provider_is_fatal() {
    let orchestrator = orchestrator(
        Arc::new(FakeFactory::new()),
        &[],
        FixedPlanner::failing(),
        settings(),
    );

    let result = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(OrchestrationError::NoProvidersAvailable(_))
    ));
}

#[tokio::test]
async fn test_partial_connect_is_recorded() {
    let factory = Arc::new(rising_market());
    let orchestrator = orchestrator(
        factory,
        &["market", "news"],
        FixedPlanner::document(price_plan(&["bitcoin"])),
        settings(),
    );

    let session = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert!(session.errors.iter().any(|e| e.starts_with("connect news:")));
    assert_eq!(session.status, SessionStatus::Partial);
    assert_eq!(session.analyzed_count(), 1);
}

#[tokio::test]
async fn test_context_operation_failure_is_recorded() {
    let factory = Arc::new(rising_market());
    let mut parameters = Map::new();
    parameters.insert("limit".to_string(), json!(5));
    let orchestrator = orchestrator(
        factory,
        &["market"],
        FixedPlanner::document(price_plan(&["bitcoin"])),
        EngineSettings {
            context_operations: vec![ContextOperation {
                key: "trending".to_string(),
                provider: "market".to_string(),
                operation: "get_trending".to_string(),
                parameters,
            }],
            ..settings()
        },
    );

    let session = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert!(session
        .errors
        .iter()
        .any(|e| e.starts_with("context trending market/get_trending:")));
    assert_eq!(session.analyzed_count(), 1);
}

#[tokio::test]
async fn test_session_is_persisted() {
    let factory = Arc::new(rising_market());
    let orchestrator = orchestrator(
        factory,
        &["market"],
        FixedPlanner::document(price_plan(&["bitcoin"])),
        settings(),
    );

    let session = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await
        .unwrap();

    let stored = assert_ok!(orchestrator.store().get_by_id(session.id).await).unwrap();
    assert_eq!(stored.plan_fingerprint, session.plan_fingerprint);
    assert!(verify_fingerprint(&stored));
}

struct UnavailableStore;

#[async_trait]
impl SessionStore for UnavailableStore {
    async fn put(&self, _session: &Session) -> Result<()> {
        Err(OrchestrationError::StoreError("connection refused".to_string()))
    }

    async fn get_recent(&self, _limit: usize) -> Result<Vec<Session>> {
        Ok(Vec::new())
    }

    async fn get_by_id(&self, _id: Uuid) -> Result<Option<Session>> {
        Ok(None)
    }

    async fn prune(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_store_failure_still_returns_session() {
    let factory = Arc::new(rising_market());
    let orchestrator = Orchestrator::new(
        manager(factory, &["market"]),
        FixedPlanner::document(price_plan(&["bitcoin"])),
        Box::new(HeuristicAnalyzer),
        Box::new(AggregateSynthesizer),
        Arc::new(UnavailableStore),
        settings(),
    );

    let session = orchestrator
        .run(request("bitcoin", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.errors.len(), 1);
    assert!(session.errors[0].starts_with("store:"));
    assert_eq!(session.analyzed_count(), 1);
}
