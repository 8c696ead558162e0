//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use query_orchestrator::agents::{
    ConversationContext, ExecutionPlan, ExecutionPlanner, SourceKind, SourceResult,
};
use query_orchestrator::flow::InteractionRecord;
use query_orchestrator::{
    Agent, AgentContext, AgentKind, AgentResponse, DataSource, DataSourceCatalog, FlowController,
    FlowControllerBuilder, LearningRecorder, OrchestratorConfig, QueryCacheRecorder,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a [`ScriptedAgent`] behaves when invoked
#[derive(Clone)]
pub enum Script {
    Respond(AgentResponse),
    Fail(String),
    Panic,
    Sleep(Duration, AgentResponse),
}

/// Agent replaying a fixed script and remembering what it saw
pub struct ScriptedAgent {
    script: Script,
    calls: AtomicUsize,
    last_context: Mutex<Option<AgentContext>>,
}

impl ScriptedAgent {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            last_context: Mutex::new(None),
        })
    }

    pub fn responding(data: serde_json::Value) -> Arc<Self> {
        Self::new(Script::Respond(AgentResponse::success(data)))
    }

    pub fn responding_with_tokens(data: serde_json::Value, tokens: u64) -> Arc<Self> {
        Self::new(Script::Respond(
            AgentResponse::success(data).with_tokens(tokens),
        ))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::new(Script::Fail(message.to_string()))
    }

    pub fn sleeping(delay: Duration, data: serde_json::Value) -> Arc<Self> {
        Self::new(Script::Sleep(delay, AgentResponse::success(data)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<AgentContext> {
        self.last_context.lock().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock() = Some(context.clone());

        match &self.script {
            Script::Respond(response) => Ok(response.clone()),
            Script::Fail(message) => Err(anyhow!(message.clone())),
            Script::Panic => panic!("scripted agent panic"),
            Script::Sleep(delay, response) => {
                tokio::time::sleep(*delay).await;
                Ok(response.clone())
            }
        }
    }
}

/// Greets back on salutations, passes everything else through
pub struct KeywordGreetingAgent;

#[async_trait]
impl Agent for KeywordGreetingAgent {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        let query = context.user_query.trim().to_lowercase();
        let is_greeting = ["hello", "hi", "hey", "good morning"]
            .iter()
            .any(|g| query == *g || query.starts_with(&format!("{g} ")));
        Ok(AgentResponse::success(json!({"is_greeting": is_greeting})).with_tokens(5))
    }
}

/// Keeps every available source
pub struct PassThroughFilterAgent;

#[async_trait]
impl Agent for PassThroughFilterAgent {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        Ok(AgentResponse::success(json!({
            "sources": context.available_sources,
            "reasoning": "all sources look relevant"
        }))
        .with_tokens(40))
    }
}

/// Returns one successful row set per relevant source of its kind
pub struct SourceExecutorAgent {
    kind: SourceKind,
}

impl SourceExecutorAgent {
    pub fn new(kind: SourceKind) -> Arc<Self> {
        Arc::new(Self { kind })
    }
}

#[async_trait]
impl Agent for SourceExecutorAgent {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        let results: Vec<SourceResult> = context
            .relevant_sources_of(self.kind)
            .map(|source| SourceResult {
                source_id: source.id.clone(),
                source_name: source.name.clone(),
                source_kind: source.kind,
                success: true,
                data: json!({"rows": [{"region": "EMEA", "revenue": 1200}]}),
                error: None,
            })
            .collect();
        Ok(AgentResponse::success(json!({"results": results})).with_tokens(100))
    }
}

pub struct StaticCatalog {
    sources: Vec<DataSource>,
}

impl StaticCatalog {
    pub fn new(sources: Vec<DataSource>) -> Arc<Self> {
        Arc::new(Self { sources })
    }
}

#[async_trait]
impl DataSourceCatalog for StaticCatalog {
    async fn list_sources(&self, _workspace_id: &str) -> Result<Vec<DataSource>> {
        Ok(self.sources.clone())
    }
}

pub enum PlannerScript {
    Plan(ExecutionPlan),
    Fail,
}

pub struct ScriptedPlanner {
    script: PlannerScript,
}

impl ScriptedPlanner {
    pub fn skipping(agents: &[AgentKind]) -> Arc<Self> {
        Arc::new(Self {
            script: PlannerScript::Plan(ExecutionPlan::new(
                Vec::new(),
                agents.iter().map(|k| k.as_str().to_string()).collect(),
                2_000,
                0.9,
                "scripted plan",
            )),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            script: PlannerScript::Fail,
        })
    }
}

#[async_trait]
impl ExecutionPlanner for ScriptedPlanner {
    async fn create_execution_plan(
        &self,
        _query: &str,
        _available_sources: &[DataSource],
        _conversation_context: &ConversationContext,
        _user_id: Option<&str>,
    ) -> Result<ExecutionPlan> {
        match &self.script {
            PlannerScript::Plan(plan) => Ok(plan.clone()),
            PlannerScript::Fail => Err(anyhow!("planner model unavailable")),
        }
    }
}

/// Counts both recorder calls
#[derive(Default)]
pub struct CountingRecorder {
    pub interactions: Mutex<Vec<InteractionRecord>>,
    pub executions: AtomicUsize,
}

#[async_trait]
impl LearningRecorder for CountingRecorder {
    async fn record_interaction(&self, record: &InteractionRecord) -> Result<()> {
        self.interactions.lock().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl QueryCacheRecorder for CountingRecorder {
    async fn record_query_execution(
        &self,
        _query: &str,
        _workspace_id: &str,
        _user_id: Option<&str>,
        _data_source_ids: &[String],
        _success: bool,
        _duration_ms: u64,
    ) -> Result<()> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn workspace_sources() -> Vec<DataSource> {
    vec![
        DataSource::new("db-1", "Sales warehouse", SourceKind::Database),
        DataSource::new("file-1", "Q3 report.xlsx", SourceKind::File),
        DataSource::new("ext-1", "CRM API", SourceKind::External),
    ]
}

/// A full set of agents answering a data question successfully
pub fn happy_agents() -> HashMap<AgentKind, Arc<dyn Agent>> {
    let mut agents: HashMap<AgentKind, Arc<dyn Agent>> = HashMap::new();
    agents.insert(AgentKind::Greeting, Arc::new(KeywordGreetingAgent));
    agents.insert(
        AgentKind::Guardrails,
        ScriptedAgent::responding_with_tokens(json!({"allowed": true}), 20),
    );
    agents.insert(
        AgentKind::Validation,
        ScriptedAgent::responding_with_tokens(json!({"is_valid": true}), 30),
    );
    agents.insert(
        AgentKind::PromptEngineering,
        ScriptedAgent::responding_with_tokens(
            json!({"rewritten_query": "Total revenue by region for last quarter"}),
            50,
        ),
    );
    agents.insert(AgentKind::DataSourceFilter, Arc::new(PassThroughFilterAgent));
    agents.insert(
        AgentKind::ExternalSearch,
        ScriptedAgent::responding(json!({"results": [], "summary": "no public data"})),
    );
    agents.insert(
        AgentKind::DatabaseExecution,
        SourceExecutorAgent::new(SourceKind::Database),
    );
    agents.insert(AgentKind::FileExecution, SourceExecutorAgent::new(SourceKind::File));
    agents.insert(
        AgentKind::ExternalExecution,
        SourceExecutorAgent::new(SourceKind::External),
    );
    agents.insert(
        AgentKind::SourceCredibility,
        ScriptedAgent::responding(json!({"overall_score": 0.9})),
    );
    agents.insert(
        AgentKind::CrossValidation,
        ScriptedAgent::responding(json!({"agreement_score": 0.8})),
    );
    agents.insert(
        AgentKind::Synthesis,
        ScriptedAgent::responding_with_tokens(
            json!({
                "answer": "EMEA led revenue last quarter.",
                "confidence": 0.8,
                "follow_up_suggestions": ["Break it down by product line"]
            }),
            400,
        ),
    );
    agents.insert(
        AgentKind::HallucinationDetection,
        ScriptedAgent::responding_with_tokens(json!({"risk": "low"}), 60),
    );
    agents.insert(
        AgentKind::Visual,
        ScriptedAgent::responding(json!({
            "should_visualize": true,
            "chart_type": "bar",
            "spec": {"x": "region", "y": "revenue"}
        })),
    );
    agents
}

/// Test-writer subscriber honoring `RUST_LOG`; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builder preloaded with [`happy_agents`], the three-source catalog and a
/// plan that skips nothing
pub fn controller_builder(
    overrides: Vec<(AgentKind, Arc<dyn Agent>)>,
) -> FlowControllerBuilder {
    init_test_logging();
    let mut agents = happy_agents();
    for (kind, agent) in overrides {
        agents.insert(kind, agent);
    }

    let mut builder = FlowController::builder(OrchestratorConfig::default())
        .planner(ScriptedPlanner::skipping(&[]))
        .catalog(StaticCatalog::new(workspace_sources()));
    for (kind, agent) in agents {
        builder = builder.agent(kind, agent);
    }
    builder
}

pub fn build_controller(overrides: Vec<(AgentKind, Arc<dyn Agent>)>) -> FlowController {
    controller_builder(overrides)
        .build()
        .expect("controller builds with every agent registered")
}

/// Poll until `condition` holds or a second has passed
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
