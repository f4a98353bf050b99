//! Main orchestrator - drives one analysis session
//!
//! QUERY → ENTITIES → CONNECT → CONTEXT → PLAN → (EXECUTE → ANALYZE)* → SYNTHESIZE → STORE

use crate::analysis::{AnalysisRequest, Analyzer, HeuristicAnalyzer, LlmAnalyzer};
use crate::audit::compute_plan_fingerprint;
use crate::config::{AppConfig, EngineSettings};
use crate::context::SessionContext;
use crate::error::OrchestrationError;
use crate::execution::StepExecutor;
use crate::gemini::{GeminiClient, LanguageModel};
use crate::models::{
    AnalysisResult, ExecutionPlan, PlanSource, Session, SessionRequest, SessionStatus,
};
use crate::planner::{fallback_plan, parse_plan, CatalogPlanner, LlmPlanner, Planner};
use crate::providers::{ConnectionManager, StdioTransportFactory};
use crate::state::{build_session_store, SessionStore};
use crate::synthesis::{AggregateSynthesizer, LlmSynthesizer, Synthesizer};
use crate::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod transition;

pub use transition::{should_continue, Phase};

/// Main orchestrator that coordinates the entire workflow
pub struct Orchestrator {
    manager: Arc<ConnectionManager>,
    executor: StepExecutor,
    planner: Box<dyn Planner>,
    analyzer: Box<dyn Analyzer>,
    synthesizer: Box<dyn Synthesizer>,
    store: Arc<dyn SessionStore>,
    settings: EngineSettings,
}

impl Orchestrator {
    pub fn new(
        manager: Arc<ConnectionManager>,
        planner: Box<dyn Planner>,
        analyzer: Box<dyn Analyzer>,
        synthesizer: Box<dyn Synthesizer>,
        store: Arc<dyn SessionStore>,
        settings: EngineSettings,
    ) -> Self {
        let executor = StepExecutor::new(
            manager.clone(),
            settings.aliases.clone(),
            settings.step_timeout,
        );

        Self {
            manager,
            executor,
            planner,
            analyzer,
            synthesizer,
            store,
            settings,
        }
    }

    /// Wire the production components from process configuration.
    ///
    /// Without a Gemini key the catalog planner, heuristic analyzer and
    /// aggregate synthesizer are used.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let factory = Arc::new(StdioTransportFactory::new(config.rpc_read_timeout));
        let manager = Arc::new(ConnectionManager::new(
            config.providers.providers.clone(),
            factory,
        ));
        let store = build_session_store(config.database_url.as_deref());

        let settings = config.engine_settings();

        let (planner, analyzer, synthesizer): (
            Box<dyn Planner>,
            Box<dyn Analyzer>,
            Box<dyn Synthesizer>,
        ) = match &config.gemini_api_key {
            Some(key) => {
                let model: Arc<dyn LanguageModel> =
                    Arc::new(GeminiClient::new(key.clone(), &config.gemini_model)?);
                info!(model = %config.gemini_model, "Using language-model planner and analysts");
                (
                    Box::new(LlmPlanner::new(model.clone(), settings.max_plan_steps)),
                    Box::new(LlmAnalyzer::new(model.clone())),
                    Box::new(LlmSynthesizer::new(model)),
                )
            }
            None => {
                warn!("GEMINI_API_KEY not set; running with offline planner and analysts");
                (
                    Box::new(CatalogPlanner),
                    Box::new(HeuristicAnalyzer),
                    Box::new(AggregateSynthesizer),
                )
            }
        };

        Ok(Self::new(
            manager,
            planner,
            analyzer,
            synthesizer,
            store,
            settings,
        ))
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Run one session to completion.
    ///
    /// Only a total lack of providers is fatal; every other failure is
    /// recorded on the session, which is always returned.
    pub async fn run(&self, request: SessionRequest, cancel: CancellationToken) -> Result<Session> {
        let start_time = Instant::now();
        let created_at = Utc::now();
        let session_id = Uuid::new_v4();
        let mut reasoning_trace = Vec::new();
        let mut errors = Vec::new();

        info!(
            session = %session_id,
            query = %request.query,
            "Orchestrator: starting session"
        );

        reasoning_trace.push("INPUT: Query received".to_string());

        // === ENTITIES ===
        let entities = self
            .settings
            .aliases
            .target_entities(&request.query, &request.entities);

        reasoning_trace.push(format!("ENTITIES: [{}]", entities.join(", ")));

        // === CONNECT ===
        self.connect_providers(&mut errors).await?;
        reasoning_trace.push(format!(
            "CONNECT: {} provider(s) connected",
            self.manager.connected_count().await
        ));

        // === CONTEXT ===
        let mut context = SessionContext::new(request.query.clone(), entities.clone());
        context.providers = self.manager.status().await;
        context.catalog = self.settings.catalog.clone();
        self.gather_context(&mut context, &mut errors).await;

        // === PLAN ===
        let (mut plan, plan_source) = self.build_plan(&context).await;

        debug!(
            session = %session_id,
            step_count = plan.len(),
            source = ?plan_source,
            "Plan ready"
        );
        reasoning_trace.push(format!(
            "PLAN: {} step(s) from {:?}",
            plan.len(),
            plan_source
        ));

        // === EXECUTE / ANALYZE ===
        self.run_steps(&mut plan, &mut context, &mut errors, &mut reasoning_trace, &cancel)
            .await;

        // === SYNTHESIZE ===
        reasoning_trace.push(format!(
            "SYNTHESIZE: {} analysis result(s)",
            context.prior.len()
        ));
        let summary = self.synthesizer.synthesize(&context.prior, &context).await;

        let mut results: BTreeMap<String, Vec<AnalysisResult>> = BTreeMap::new();
        for result in context.prior {
            results
                .entry(result.target_entity.clone())
                .or_default()
                .push(result);
        }

        // A token fired during the last step still cancels the session
        let status = if cancel.is_cancelled() {
            SessionStatus::Cancelled
        } else if !errors.is_empty() {
            SessionStatus::Partial
        } else {
            SessionStatus::Completed
        };

        let plan_fingerprint = match compute_plan_fingerprint(&plan) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(session = %session_id, error = %e, "Failed to fingerprint plan");
                String::new()
            }
        };

        reasoning_trace.push(format!("COMPLETE: {:?}", status));

        let mut session = Session {
            id: session_id,
            query: request.query,
            target_entities: entities,
            plan,
            plan_source,
            plan_fingerprint,
            results,
            summary,
            errors,
            status,
            reasoning_trace,
            created_at,
            completed_at: Utc::now(),
        };

        // === STORE ===
        if let Err(e) = self.store.put(&session).await {
            warn!(session = %session_id, error = %e, "Failed to persist session");
            session.errors.push(format!("store: {}", e));
        }

        info!(
            session = %session_id,
            status = ?session.status,
            analyzed = session.analyzed_count(),
            errors = session.errors.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Orchestrator: session finished"
        );

        Ok(session)
    }

    async fn connect_providers(&self, errors: &mut Vec<String>) -> Result<()> {
        let attempts = self.manager.connect_all().await;

        if attempts.is_empty() {
            return Err(OrchestrationError::NoProvidersAvailable(
                "no providers configured".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for attempt in &attempts {
            if let Err(e) = &attempt.result {
                failures.push(format!("{}: {}", attempt.provider, e));
            }
        }

        if failures.len() == attempts.len() {
            return Err(OrchestrationError::NoProvidersAvailable(failures.join("; ")));
        }

        errors.extend(failures.into_iter().map(|f| format!("connect {}", f)));
        Ok(())
    }

    async fn gather_context(&self, context: &mut SessionContext, errors: &mut Vec<String>) {
        for op in &self.settings.context_operations {
            match self.executor.call(&op.provider, &op.operation, &op.parameters).await {
                Ok(value) => {
                    context.gathered.insert(op.key.clone(), value);
                }
                Err(e) => {
                    warn!(key = %op.key, error = %e, "Context operation failed");
                    errors.push(format!(
                        "context {} {}/{}: {}",
                        op.key, op.provider, op.operation, e
                    ));
                }
            }
        }
    }

    /// Planner output when it validates; the deterministic fallback otherwise.
    async fn build_plan(&self, context: &SessionContext) -> (ExecutionPlan, PlanSource) {
        let raw = match self.planner.create_plan(context).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Planner failed; using fallback plan");
                return self.fallback(context);
            }
        };

        match parse_plan(
            &raw,
            &context.entities,
            &self.settings.aliases,
            self.settings.max_plan_steps,
        ) {
            Ok(validated) if validated.is_clean() => (validated.value, PlanSource::Planner),
            Ok(validated) => {
                debug!(defaulted = ?validated.defaulted, "Plan accepted with defaults");
                (validated.value, PlanSource::PlannerWithDefaults)
            }
            Err(e) => {
                warn!(error = %e, "Planner output rejected; using fallback plan");
                self.fallback(context)
            }
        }
    }

    fn fallback(&self, context: &SessionContext) -> (ExecutionPlan, PlanSource) {
        (
            fallback_plan(&context.entities, &self.settings.catalog),
            PlanSource::Fallback,
        )
    }

    /// Drive the step loop until done or cancelled.
    async fn run_steps(
        &self,
        plan: &mut ExecutionPlan,
        context: &mut SessionContext,
        errors: &mut Vec<String>,
        trace: &mut Vec<String>,
        cancel: &CancellationToken,
    ) {
        let mut current_index = 0;
        let mut just_completed = false;

        loop {
            match should_continue(plan, current_index, just_completed) {
                Phase::Executing(i) => {
                    if cancel.is_cancelled() {
                        info!(remaining = plan.len() - i, "Session cancelled; skipping remaining steps");
                        trace.push(format!("CANCELLED: {} step(s) not run", plan.len() - i));
                        return;
                    }

                    let Some(step) = plan.step_mut(i) else {
                        return;
                    };

                    trace.push(format!(
                        "EXECUTE: step {} {}/{}",
                        step.id, step.provider, step.operation
                    ));

                    if let Some(line) = self.executor.execute_step(step).await {
                        errors.push(line);
                    }

                    current_index = i + 1;
                    just_completed = true;
                }
                Phase::Analyzing(i) => {
                    just_completed = false;

                    if let Some(result) = self.analyze_step(plan, i, context).await {
                        trace.push(format!(
                            "ANALYZE: step {} {} ({:.2})",
                            result.step_id, result.judgment.sentiment, result.confidence
                        ));
                        context.prior.push(result);
                    }
                }
                Phase::Planning | Phase::Synthesizing | Phase::Done => return,
            }
        }
    }

    /// Forward a completed step's payload to the analyzer. Failed steps and
    /// payload-less results are left out of the aggregate.
    async fn analyze_step(
        &self,
        plan: &ExecutionPlan,
        index: usize,
        context: &SessionContext,
    ) -> Option<AnalysisResult> {
        let step = plan.step(index)?;
        let payload = step.result()?.payload()?;

        let request = AnalysisRequest {
            step_id: step.id,
            payload,
            kind: self.settings.category_of(&step.provider, &step.operation),
            operation: &step.operation,
            target_entity: &step.target_entity,
        };

        let result = self.analyzer.analyze(request, context).await;
        if result.is_none() {
            debug!(step = step.id, "No judgment for step");
        }
        result
    }
}
