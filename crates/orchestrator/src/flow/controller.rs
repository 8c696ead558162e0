//! Flow Controller
//!
//! Answers one query by sequencing the agent stages:
//!
//! 1. context analysis of the conversation history
//! 2. greeting / guardrails / validation pre-checks, in parallel
//! 3. query rewrite
//! 4. execution planning
//! 5. source filtering
//! 6. per-source-type execution plus optional external search, in parallel
//! 7. credibility and cross-validation, in parallel and plan-gated
//! 8. synthesis
//! 9. hallucination check (plan-gated)
//! 10. visualization planning (plan-gated, advisory)
//!
//! Any stage failure is caught once in [`FlowController::process_query`] and
//! turned into an apology response; the caller always gets a response.

use common::OperationTimer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::collaborators::{
    DataSourceCatalog, InteractionRecord, LearningRecorder, QueryCacheRecorder,
};
use super::context_analysis::{ContextAnalyzer, LexicalContextAnalyzer};
use super::external::{ExternalDataPredicate, LexicalCuePredicate};
use super::response::{EnhancedAgentResponse, FlowMetadata, QueryRequest, TokenLedger};
use crate::agents::{
    Agent, AgentContext, AgentKind, AgentResponse, ConversationContext, CredibilityOutcome,
    CrossValidationOutcome, DataSource, ExecutionPlan, ExecutionPlanner, ExternalSearchOutcome,
    GreetingOutcome, GuardrailOutcome, HallucinationOutcome, RewriteOutcome,
    SourceExecutionOutcome, SourceFilterOutcome, SourceKind, SynthesisOutcome, ValidationOutcome,
    VisualizationOutcome,
};
use crate::config::{FlowConfig, OrchestratorConfig, StreamingConfig};
use crate::error::{ConfigError, FlowError, FlowResult};
use crate::parallel::{
    run_guarded, ExecutionResult, GuardedOutcome, ParallelExecutor, ParallelTask, TaskStatus,
};
use crate::streaming::SessionStreamBroadcaster;

/// Steps a streaming session counts: every agent role plus the final
/// aggregation, which only `final_result` completes.
pub const SESSION_STEPS: usize = AgentKind::ALL.len() + 1;

const GREETING_REPLY: &str = "Hello! How can I help you explore your data today?";
const REFUSAL_FALLBACK: &str = "I can't help with that request.";
const CLARIFICATION_FALLBACK: &str = "Query needs clarification";
const NO_SOURCES_ERROR: &str = "No relevant data sources found";
const APOLOGY: &str =
    "I'm sorry, something went wrong while answering your question. Please try again.";

const SOURCE_EXECUTION_ORDER: [SourceKind; 3] =
    [SourceKind::Database, SourceKind::File, SourceKind::External];

fn clarification_follow_ups() -> Vec<String> {
    [
        "Name the metric or field you want to analyze",
        "Add the time period you are interested in",
        "Mention which data source or table to use",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn no_source_follow_ups() -> Vec<String> {
    [
        "Connect a database or upload files in workspace settings",
        "Check that your data sources are active and reachable",
        "Rephrase your question to reference data in your connected sources",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Per-query mutable state
struct QueryRun {
    request: QueryRequest,
    session_id: Option<String>,
    started: Instant,
    ledger: TokenLedger,
    metadata: FlowMetadata,
    cancellation: CancellationToken,
}

impl QueryRun {
    fn new(request: QueryRequest, cancellation: CancellationToken) -> Self {
        Self {
            request,
            session_id: None,
            started: Instant::now(),
            ledger: TokenLedger::default(),
            metadata: FlowMetadata::default(),
            cancellation,
        }
    }
}

pub struct FlowController {
    config: FlowConfig,
    streaming: StreamingConfig,
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    planner: Arc<dyn ExecutionPlanner>,
    catalog: Arc<dyn DataSourceCatalog>,
    executor: Arc<ParallelExecutor>,
    broadcaster: Option<Arc<SessionStreamBroadcaster>>,
    learning: Option<Arc<dyn LearningRecorder>>,
    query_cache: Option<Arc<dyn QueryCacheRecorder>>,
    context_analyzer: Arc<dyn ContextAnalyzer>,
    external_predicate: Arc<dyn ExternalDataPredicate>,
}

impl FlowController {
    pub fn builder(config: OrchestratorConfig) -> FlowControllerBuilder {
        FlowControllerBuilder::new(config)
    }

    pub fn executor(&self) -> &Arc<ParallelExecutor> {
        &self.executor
    }

    /// Start the idle-session sweep of the attached broadcaster with the
    /// configured interval and timeout. `None` without a broadcaster.
    pub fn spawn_session_sweeper(&self) -> Option<JoinHandle<()>> {
        let broadcaster = self.broadcaster.as_ref()?;
        Some(broadcaster.spawn_cleanup_task_from(&self.streaming))
    }

    /// Answer a query. Never fails: stage failures become an apology.
    pub async fn process_query(&self, request: QueryRequest) -> EnhancedAgentResponse {
        self.process_query_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`process_query`](Self::process_query); cancelling the token
    /// aborts running agents and fails the flow.
    pub async fn process_query_with_cancel(
        &self,
        request: QueryRequest,
        cancellation: CancellationToken,
    ) -> EnhancedAgentResponse {
        let mut timer = OperationTimer::new("process_query");
        timer.add_field("workspace_id", &request.workspace_id);
        timer.add_field("agent_id", &request.agent_id);

        let mut run = QueryRun::new(request, cancellation);
        self.open_session(&mut run);

        info!(
            workspace_id = %run.request.workspace_id,
            session_id = run.session_id.as_deref().unwrap_or(""),
            history = run.request.conversation_history.len(),
            "Processing query"
        );

        let response = match self.run_pipeline(&mut run).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    workspace_id = %run.request.workspace_id,
                    error = %e,
                    "Query flow failed"
                );
                EnhancedAgentResponse::failure(APOLOGY, e.to_string())
            }
        };

        let response = self.finalize(&mut run, response);
        self.close_session(&run, &response);
        self.record_telemetry(&run, &response);

        timer.add_field("tokens_used", response.tokens_used);
        timer.add_field("agents", response.metadata.agents_executed.len());
        timer.finish_with_outcome(response.success);
        response
    }

    async fn run_pipeline(&self, run: &mut QueryRun) -> FlowResult<EnhancedAgentResponse> {
        let request = run.request.clone();

        let history_start = request
            .conversation_history
            .len()
            .saturating_sub(self.config.max_history_messages);
        let history = &request.conversation_history[history_start..];
        let analysis = self.context_analyzer.analyze(&request.query, history);
        let filtered = self
            .context_analyzer
            .filter_history(&request.query, history, &analysis);
        run.metadata.context_strategy = analysis.strategy.tag().to_string();
        debug!(
            is_follow_up = analysis.is_follow_up,
            relevance = analysis.relevance,
            strategy = analysis.strategy.tag(),
            kept = filtered.len(),
            "Conversation context analyzed"
        );

        let conversation = ConversationContext {
            history: filtered.clone(),
            analysis,
        };
        let base = Arc::new(
            AgentContext::new(&request.query, &request.workspace_id)
                .with_history(filtered)
                .with_user(request.user_id.clone())
                .with_selected_sources(request.selected_data_sources.clone()),
        );

        if let Some(early_exit) = self.run_prechecks(run, base.clone()).await? {
            return Ok(early_exit);
        }

        let context = self.rewrite_query(run, &base).await?;

        let sources = self.available_sources(&request).await?;
        let context = context.derive_with_available_sources(sources.clone());
        let plan = self
            .create_plan(&context, &sources, &conversation, request.user_id.as_deref())
            .await;
        run.metadata.execution_plan = Some(plan.clone());

        let relevant = self.filter_sources(run, &context).await?;
        if relevant.is_empty() {
            info!(workspace_id = %request.workspace_id, "No relevant data sources for query");
            run.metadata.early_exit = Some("no_sources".to_string());
            return Ok(EnhancedAgentResponse::failure(
                "I couldn't find any connected data sources relevant to your question.",
                NO_SOURCES_ERROR,
            )
            .with_follow_ups(no_source_follow_ups()));
        }
        let context = context.derive_with_relevant_sources(relevant);

        let context = self.execute_sources(run, context).await?;
        let context = self.validate_sources(run, context, &plan).await?;
        let synthesis = self.synthesize(run, &context).await?;
        let context = Arc::new(context.derive_with_synthesis(synthesis.clone()));

        let mut content = synthesis.answer.clone();
        let mut confidence = synthesis.confidence.clamp(0.0, 1.0);

        if plan.should_run(AgentKind::HallucinationDetection) {
            if let Some(check) = self.check_hallucination(run, context.clone()).await {
                if let Some(disclaimer) = check.risk.disclaimer() {
                    content = format!("{disclaimer}\n\n{content}");
                }
                confidence *= check.risk.confidence_factor();
                info!(risk = ?check.risk, confidence, "Hallucination check applied");
                run.metadata.hallucination = Some(check);
            }
        }

        let visualization = if plan.should_run(AgentKind::Visual) {
            self.plan_visualization(run, context.clone()).await
        } else {
            None
        };

        let mut data_sources_used: Vec<String> = Vec::new();
        for result in context.source_results.iter().filter(|r| r.success) {
            if !data_sources_used.contains(&result.source_id) {
                data_sources_used.push(result.source_id.clone());
            }
        }

        let mut response = EnhancedAgentResponse::answer(content, confidence)
            .with_follow_ups(synthesis.follow_up_suggestions);
        response.data_sources_used = data_sources_used;
        response.visualization = visualization;
        Ok(response)
    }

    /// Greeting, guardrails and validation. All three resolve before any
    /// exit decision is made.
    async fn run_prechecks(
        &self,
        run: &mut QueryRun,
        context: Arc<AgentContext>,
    ) -> FlowResult<Option<EnhancedAgentResponse>> {
        let kinds = [
            AgentKind::Greeting,
            AgentKind::Guardrails,
            AgentKind::Validation,
        ];
        let (mut results, _) = self.call_parallel(run, &kinds, context).await?;

        let greeting = take_response(&mut results, AgentKind::Greeting)?;
        let guardrails = take_response(&mut results, AgentKind::Guardrails)?;
        let validation = take_response(&mut results, AgentKind::Validation)?;

        let greeting_outcome: GreetingOutcome =
            greeting.decode_or_default(AgentKind::Greeting.as_str());
        if greeting.success && greeting_outcome.is_greeting {
            info!("Greeting detected, skipping data pipeline");
            run.metadata.early_exit = Some("greeting".to_string());
            let reply = greeting_outcome
                .response
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| GREETING_REPLY.to_string());
            return Ok(Some(EnhancedAgentResponse::answer(reply, 1.0)));
        }

        let guard: GuardrailOutcome = guardrails.decode_or_default(AgentKind::Guardrails.as_str());
        if !(guardrails.success && guard.allowed) {
            let reason = guard
                .reason
                .or(guardrails.error)
                .unwrap_or_else(|| REFUSAL_FALLBACK.to_string());
            warn!(violations = ?guard.violations, reason = %reason, "Query refused by guardrails");
            run.metadata.early_exit = Some("guardrails".to_string());
            return Ok(Some(EnhancedAgentResponse::failure(reason.clone(), reason)));
        }

        let check: ValidationOutcome = validation.decode_or_default(AgentKind::Validation.as_str());
        if !(validation.success && check.is_valid) {
            let reason = check
                .reason
                .or(validation.error)
                .unwrap_or_else(|| CLARIFICATION_FALLBACK.to_string());
            info!(reason = %reason, "Query needs clarification");
            run.metadata.early_exit = Some("validation".to_string());
            let content = check.clarification.unwrap_or_else(|| {
                format!("Could you clarify your question? {reason}")
                    .trim()
                    .to_string()
            });
            let follow_ups = if check.suggestions.is_empty() {
                clarification_follow_ups()
            } else {
                check.suggestions
            };
            return Ok(Some(
                EnhancedAgentResponse::failure(content, reason).with_follow_ups(follow_ups),
            ));
        }

        Ok(None)
    }

    async fn rewrite_query(
        &self,
        run: &mut QueryRun,
        base: &Arc<AgentContext>,
    ) -> FlowResult<AgentContext> {
        let response = self
            .call_agent(run, AgentKind::PromptEngineering, base.clone())
            .await?;
        if !response.success {
            warn!(error = ?response.error, "Query rewrite reported failure, keeping original query");
            return Ok(base.as_ref().clone());
        }

        let outcome: RewriteOutcome =
            response.decode_or_default(AgentKind::PromptEngineering.as_str());
        match outcome.rewritten_query.filter(|q| !q.trim().is_empty()) {
            Some(rewritten) => {
                debug!(rewritten = %rewritten, intent = ?outcome.intent, "Query rewritten");
                Ok(base.derive_with_rewritten_query(rewritten))
            }
            None => Ok(base.as_ref().clone()),
        }
    }

    async fn available_sources(&self, request: &QueryRequest) -> FlowResult<Vec<DataSource>> {
        let mut sources = self
            .catalog
            .list_sources(&request.workspace_id)
            .await
            .map_err(|e| FlowError::stage("DataSourceCatalog", format!("{e:#}")))?;

        if let Some(selected) = request
            .selected_data_sources
            .as_ref()
            .filter(|s| !s.is_empty())
        {
            sources.retain(|source| selected.contains(&source.id));
        }

        debug!(available = sources.len(), "Workspace data sources listed");
        Ok(sources)
    }

    /// Ask the planner; fall back to running every agent when it fails.
    async fn create_plan(
        &self,
        context: &AgentContext,
        sources: &[DataSource],
        conversation: &ConversationContext,
        user_id: Option<&str>,
    ) -> ExecutionPlan {
        let planning = self.planner.create_execution_plan(
            context.effective_query(),
            sources,
            conversation,
            user_id,
        );

        match tokio::time::timeout(self.config.stage_timeout(), planning).await {
            Ok(Ok(plan)) => {
                info!(
                    skip = ?plan.skip_agents,
                    confidence = plan.confidence,
                    estimated_time_ms = plan.estimated_time_ms,
                    "Execution plan created"
                );
                plan
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Planner failed, running every agent");
                ExecutionPlan::run_everything(format!("planner failed: {e}"))
            }
            Err(_) => {
                warn!("Planner timed out, running every agent");
                ExecutionPlan::run_everything("planner timed out")
            }
        }
    }

    async fn filter_sources(
        &self,
        run: &mut QueryRun,
        context: &AgentContext,
    ) -> FlowResult<Vec<DataSource>> {
        if context.available_sources.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .call_agent(run, AgentKind::DataSourceFilter, Arc::new(context.clone()))
            .await?;
        if !response.success {
            warn!(error = ?response.error, "Source filter reported failure, using every available source");
            return Ok(context.available_sources.clone());
        }

        let outcome: SourceFilterOutcome =
            response.decode_or_default(AgentKind::DataSourceFilter.as_str());
        let relevant: Vec<DataSource> = context
            .available_sources
            .iter()
            .filter(|source| outcome.sources.iter().any(|s| s.id == source.id))
            .cloned()
            .collect();

        debug!(
            relevant = relevant.len(),
            reasoning = outcome.reasoning.as_deref().unwrap_or(""),
            "Sources filtered"
        );
        Ok(relevant)
    }

    /// Run the executors that own at least one relevant source, plus external
    /// search when the query asks for outside knowledge.
    async fn execute_sources(
        &self,
        run: &mut QueryRun,
        context: AgentContext,
    ) -> FlowResult<AgentContext> {
        let mut kinds: Vec<AgentKind> = SOURCE_EXECUTION_ORDER
            .iter()
            .filter(|kind| context.relevant_sources_of(**kind).next().is_some())
            .map(|kind| AgentKind::executor_for(*kind))
            .collect();

        let external_search = self
            .external_predicate
            .needs_external_data(context.effective_query());
        if external_search {
            kinds.push(AgentKind::ExternalSearch);
        }
        run.metadata.external_search_used = external_search;

        let context = Arc::new(context);
        let (results, critical_path) = self.call_parallel(run, &kinds, context.clone()).await?;
        run.metadata.critical_path = critical_path;

        let mut source_results = Vec::new();
        for source_kind in SOURCE_EXECUTION_ORDER {
            let executor = AgentKind::executor_for(source_kind);
            let Some(result) = results.get(&executor) else {
                continue;
            };
            match result.successful_response() {
                Some(response) => {
                    let outcome: SourceExecutionOutcome =
                        response.decode_or_default(executor.as_str());
                    source_results.extend(outcome.results);
                }
                None => warn!(
                    agent = executor.as_str(),
                    error = result.error.as_deref().unwrap_or("reported failure"),
                    "Source executor failed, continuing without its results"
                ),
            }
        }

        let search = results
            .get(&AgentKind::ExternalSearch)
            .and_then(ExecutionResult::successful_response)
            .map(|response| {
                response.decode_or_default::<ExternalSearchOutcome>(AgentKind::ExternalSearch.as_str())
            });

        Ok(context.derive_with_source_results(source_results, search))
    }

    async fn validate_sources(
        &self,
        run: &mut QueryRun,
        context: AgentContext,
        plan: &ExecutionPlan,
    ) -> FlowResult<AgentContext> {
        let kinds: Vec<AgentKind> = [AgentKind::SourceCredibility, AgentKind::CrossValidation]
            .into_iter()
            .filter(|kind| plan.should_run(*kind))
            .collect();

        let (credibility, cross_validation) = if kinds.is_empty() {
            debug!("Validation skipped by plan");
            (
                CredibilityOutcome::default(),
                CrossValidationOutcome::default(),
            )
        } else {
            let (results, _) = self
                .call_parallel(run, &kinds, Arc::new(context.clone()))
                .await?;
            (
                outcome_or_default(&results, AgentKind::SourceCredibility),
                outcome_or_default(&results, AgentKind::CrossValidation),
            )
        };

        run.metadata.credibility = Some(credibility.clone());
        run.metadata.cross_validation = Some(cross_validation.clone());
        Ok(context.derive_with_validation(credibility, cross_validation))
    }

    async fn synthesize(
        &self,
        run: &mut QueryRun,
        context: &AgentContext,
    ) -> FlowResult<SynthesisOutcome> {
        let response = self
            .call_agent(run, AgentKind::Synthesis, Arc::new(context.clone()))
            .await?;
        if !response.success {
            return Err(FlowError::stage(
                AgentKind::Synthesis.as_str(),
                response
                    .error
                    .unwrap_or_else(|| "synthesis reported failure".to_string()),
            ));
        }
        Ok(response.decode_or_default(AgentKind::Synthesis.as_str()))
    }

    /// A failed check leaves the answer untouched.
    async fn check_hallucination(
        &self,
        run: &mut QueryRun,
        context: Arc<AgentContext>,
    ) -> Option<HallucinationOutcome> {
        match self
            .call_agent(run, AgentKind::HallucinationDetection, context)
            .await
        {
            Ok(response) if response.success => {
                Some(response.decode_or_default(AgentKind::HallucinationDetection.as_str()))
            }
            Ok(response) => {
                warn!(error = ?response.error, "Hallucination check reported failure");
                None
            }
            Err(e) => {
                warn!(error = %e, "Hallucination check failed");
                None
            }
        }
    }

    /// Advisory: failures are logged and dropped.
    async fn plan_visualization(
        &self,
        run: &mut QueryRun,
        context: Arc<AgentContext>,
    ) -> Option<serde_json::Value> {
        match self.call_agent(run, AgentKind::Visual, context).await {
            Ok(response) if response.success => response
                .decode_or_default::<VisualizationOutcome>(AgentKind::Visual.as_str())
                .into_payload(),
            Ok(response) => {
                debug!(error = ?response.error, "Visualization declined");
                None
            }
            Err(e) => {
                warn!(error = %e, "Visualization planning failed");
                None
            }
        }
    }

    fn agent(&self, kind: AgentKind) -> FlowResult<Arc<dyn Agent>> {
        self.agents
            .get(&kind)
            .cloned()
            .ok_or_else(|| FlowError::stage(kind.as_str(), "no agent registered"))
    }

    /// Single-agent stage under the stage timeout
    async fn call_agent(
        &self,
        run: &mut QueryRun,
        kind: AgentKind,
        context: Arc<AgentContext>,
    ) -> FlowResult<AgentResponse> {
        let agent = self.agent(kind)?;
        let name = kind.as_str();
        self.stream_start(run, name);
        run.metadata.agents_executed.push(name.to_string());

        let outcome = run_guarded(
            name,
            self.config.stage_timeout(),
            &run.cancellation,
            async move { agent.execute(&context).await },
        )
        .await;

        let failure = match outcome {
            GuardedOutcome::Finished(Ok(response)) => {
                run.ledger.record(name, &response);
                self.stream_complete(run, name, &response);
                return Ok(response);
            }
            GuardedOutcome::Finished(Err(e)) => FlowError::stage(name, format!("{e:#}")),
            GuardedOutcome::Panicked(message) => FlowError::stage(name, message),
            GuardedOutcome::TimedOut(timeout) => FlowError::StageTimeout {
                stage: name.to_string(),
                timeout,
            },
            GuardedOutcome::Cancelled => FlowError::stage(name, "cancelled"),
        };
        self.stream_error(run, name, &failure.to_string());
        Err(failure)
    }

    /// Independent agents through the parallel executor. Returns the results
    /// by agent together with the plan's critical path.
    async fn call_parallel(
        &self,
        run: &mut QueryRun,
        kinds: &[AgentKind],
        context: Arc<AgentContext>,
    ) -> FlowResult<(HashMap<AgentKind, ExecutionResult>, Vec<String>)> {
        let mut tasks = Vec::with_capacity(kinds.len());
        for kind in kinds {
            tasks.push(ParallelTask::for_kind(*kind, self.agent(*kind)?));
        }
        let plan = self
            .executor
            .create_execution_plan(tasks, &self.executor.config().resource_budget)?;

        for kind in kinds {
            self.stream_start(run, kind.as_str());
            run.metadata.agents_executed.push(kind.as_str().to_string());
        }

        let results = self
            .executor
            .execute_parallel_plan_with_cancel(&plan, context, run.cancellation.clone())
            .await;

        let mut by_kind = HashMap::with_capacity(results.len());
        for result in results {
            match &result.result {
                Some(response) if result.success => {
                    run.ledger.record(&result.agent_name, response);
                    self.stream_complete(run, &result.agent_name, response);
                }
                _ => self.stream_error(
                    run,
                    &result.agent_name,
                    result.error.as_deref().unwrap_or("agent failed"),
                ),
            }

            match result.agent_name.parse::<AgentKind>() {
                Ok(kind) => {
                    by_kind.insert(kind, result);
                }
                Err(e) => warn!(error = %e, "Result for unknown agent ignored"),
            }
        }

        Ok((by_kind, plan.critical_path))
    }

    fn open_session(&self, run: &mut QueryRun) {
        let (Some(broadcaster), Some(session_id)) =
            (self.broadcaster.as_ref(), run.request.session_id.as_ref())
        else {
            return;
        };

        match broadcaster.start_session(
            session_id,
            run.request.user_id.clone(),
            &run.request.workspace_id,
            &run.request.query,
            SESSION_STEPS,
        ) {
            Ok(_) => run.session_id = Some(session_id.clone()),
            Err(e) => warn!(session_id = %session_id, error = %e, "Progress streaming disabled for query"),
        }
    }

    fn close_session(&self, run: &QueryRun, response: &EnhancedAgentResponse) {
        let Some((broadcaster, session_id)) = self.stream(run) else {
            return;
        };
        let payload = serde_json::to_value(response)
            .unwrap_or_else(|e| serde_json::json!({"success": response.success, "error": e.to_string()}));
        broadcaster.emit_final_result(session_id, payload);
    }

    fn stream<'a>(&'a self, run: &'a QueryRun) -> Option<(&'a SessionStreamBroadcaster, &'a str)> {
        Some((self.broadcaster.as_deref()?, run.session_id.as_deref()?))
    }

    fn stream_start(&self, run: &QueryRun, agent: &str) {
        if let Some((broadcaster, session_id)) = self.stream(run) {
            broadcaster.emit_agent_start(session_id, agent);
        }
    }

    fn stream_complete(&self, run: &QueryRun, agent: &str, response: &AgentResponse) {
        if let Some((broadcaster, session_id)) = self.stream(run) {
            broadcaster.emit_agent_complete(
                session_id,
                agent,
                serde_json::json!({
                    "success": response.success,
                    "tokens_used": response.tokens_used(),
                }),
            );
        }
    }

    fn stream_error(&self, run: &QueryRun, agent: &str, error: &str) {
        if let Some((broadcaster, session_id)) = self.stream(run) {
            broadcaster.emit_agent_error(session_id, agent, error);
        }
    }

    fn finalize(
        &self,
        run: &mut QueryRun,
        mut response: EnhancedAgentResponse,
    ) -> EnhancedAgentResponse {
        let mut metadata = std::mem::take(&mut run.metadata);
        metadata.stage_tokens = run.ledger.stages().clone();

        response.tokens_used = run.ledger.total();
        response.estimated_credits = run
            .ledger
            .estimated_credits(self.config.credits_per_thousand_tokens);
        response.processing_time_ms = run.started.elapsed().as_millis() as u64;
        response.metadata = metadata;
        response
    }

    fn record_telemetry(&self, run: &QueryRun, response: &EnhancedAgentResponse) {
        if let Some(recorder) = self.query_cache.clone() {
            let query = run.request.query.clone();
            let workspace_id = run.request.workspace_id.clone();
            let user_id = run.request.user_id.clone();
            let source_ids = response.data_sources_used.clone();
            let success = response.success;
            let duration_ms = response.processing_time_ms;

            tokio::spawn(async move {
                if let Err(e) = recorder
                    .record_query_execution(
                        &query,
                        &workspace_id,
                        user_id.as_deref(),
                        &source_ids,
                        success,
                        duration_ms,
                    )
                    .await
                {
                    warn!(error = %e, "Query cache recording failed");
                }
            });
        }

        if let Some(recorder) = self.learning.clone() {
            let record = InteractionRecord {
                query: run.request.query.clone(),
                workspace_id: run.request.workspace_id.clone(),
                agent_id: run.request.agent_id.clone(),
                user_id: run.request.user_id.clone(),
                success: response.success,
                confidence: response.confidence_score,
                processing_time_ms: response.processing_time_ms,
                tokens_used: response.tokens_used,
                agents_executed: response.metadata.agents_executed.clone(),
                data_sources_used: response.data_sources_used.clone(),
            };

            tokio::spawn(async move {
                if let Err(e) = recorder.record_interaction(&record).await {
                    warn!(error = %e, "Learning recorder failed");
                }
            });
        }
    }
}

fn take_response(
    results: &mut HashMap<AgentKind, ExecutionResult>,
    kind: AgentKind,
) -> FlowResult<AgentResponse> {
    let result = results
        .remove(&kind)
        .ok_or_else(|| FlowError::stage(kind.as_str(), "no result reported"))?;

    match (result.status, result.result) {
        (TaskStatus::Completed, Some(response)) => Ok(response),
        (TaskStatus::TimedOut, _) => Err(FlowError::StageTimeout {
            stage: kind.as_str().to_string(),
            timeout: result.execution_time,
        }),
        _ => Err(FlowError::stage(
            kind.as_str(),
            result.error.unwrap_or_else(|| "agent failed".to_string()),
        )),
    }
}

/// Decoded outcome of a successful result, the neutral value otherwise
fn outcome_or_default<T>(results: &HashMap<AgentKind, ExecutionResult>, kind: AgentKind) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    results
        .get(&kind)
        .and_then(ExecutionResult::successful_response)
        .map(|response| response.decode_or_default(kind.as_str()))
        .unwrap_or_default()
}

/// Assembles a [`FlowController`]
pub struct FlowControllerBuilder {
    config: OrchestratorConfig,
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    planner: Option<Arc<dyn ExecutionPlanner>>,
    catalog: Option<Arc<dyn DataSourceCatalog>>,
    executor: Option<Arc<ParallelExecutor>>,
    broadcaster: Option<Arc<SessionStreamBroadcaster>>,
    learning: Option<Arc<dyn LearningRecorder>>,
    query_cache: Option<Arc<dyn QueryCacheRecorder>>,
    context_analyzer: Option<Arc<dyn ContextAnalyzer>>,
    external_predicate: Option<Arc<dyn ExternalDataPredicate>>,
}

impl FlowControllerBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            agents: HashMap::new(),
            planner: None,
            catalog: None,
            executor: None,
            broadcaster: None,
            learning: None,
            query_cache: None,
            context_analyzer: None,
            external_predicate: None,
        }
    }

    pub fn agent(mut self, kind: AgentKind, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(kind, agent);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn ExecutionPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn DataSourceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Share an executor (and its duration estimates) across controllers
    pub fn executor(mut self, executor: Arc<ParallelExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<SessionStreamBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn learning_recorder(mut self, recorder: Arc<dyn LearningRecorder>) -> Self {
        self.learning = Some(recorder);
        self
    }

    pub fn query_cache_recorder(mut self, recorder: Arc<dyn QueryCacheRecorder>) -> Self {
        self.query_cache = Some(recorder);
        self
    }

    pub fn context_analyzer(mut self, analyzer: Arc<dyn ContextAnalyzer>) -> Self {
        self.context_analyzer = Some(analyzer);
        self
    }

    pub fn external_predicate(mut self, predicate: Arc<dyn ExternalDataPredicate>) -> Self {
        self.external_predicate = Some(predicate);
        self
    }

    pub fn build(self) -> Result<FlowController, ConfigError> {
        self.config.validate()?;

        if let Some(missing) = AgentKind::ALL
            .iter()
            .find(|kind| !self.agents.contains_key(*kind))
        {
            return Err(ConfigError::Invalid(format!(
                "no agent registered for {missing}"
            )));
        }
        let planner = self
            .planner
            .ok_or_else(|| ConfigError::Invalid("an execution planner is required".to_string()))?;
        let catalog = self
            .catalog
            .ok_or_else(|| ConfigError::Invalid("a data source catalog is required".to_string()))?;

        let OrchestratorConfig {
            executor,
            flow,
            streaming,
        } = self.config;
        let external_predicate = self.external_predicate.unwrap_or_else(|| {
            Arc::new(LexicalCuePredicate::new(&flow.external_data_cues))
        });

        Ok(FlowController {
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(ParallelExecutor::new(executor))),
            config: flow,
            streaming,
            agents: self.agents,
            planner,
            catalog,
            broadcaster: self.broadcaster,
            learning: self.learning,
            query_cache: self.query_cache,
            context_analyzer: self
                .context_analyzer
                .unwrap_or_else(|| Arc::new(LexicalContextAnalyzer)),
            external_predicate,
        })
    }
}
