//! Query Flow Orchestration
//!
//! Answers natural-language questions over workspace data sources by
//! composing many narrow-purpose agents into one response, while streaming
//! progress to subscribed observers.
//!
//! # Architecture
//!
//! - **FlowController**: sequences the stages, applies the early-exit gates
//!   and consults the execution plan to skip optional agents
//! - **ParallelExecutor**: dependency-ordered groups of agents, run
//!   concurrently under a concurrency cap, a resource budget and a timeout
//! - **SessionStreamBroadcaster**: per-session lifecycle events fanned out to
//!   subscribers, with an idle-session sweep
//! - **Agent / ExecutionPlanner / DataSourceCatalog**: collaborator traits the
//!   host application implements
//!
//! # Usage
//!
//! ```no_run
//! use query_orchestrator::{FlowController, QueryRequest};
//!
//! async fn answer(controller: &FlowController) {
//!     let request = QueryRequest::new("Revenue by region last quarter", "ws-1", "analyst")
//!         .with_session("session-42");
//!     let response = controller.process_query(request).await;
//!     println!("{} (confidence {:.2})", response.content, response.confidence_score);
//! }
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod flow;
pub mod parallel;
pub mod resources;
pub mod streaming;

pub use agents::{
    Agent, AgentContext, AgentKind, AgentResponse, ConversationMessage, DataSource,
    ExecutionPlan, ExecutionPlanner, SourceKind, SourceResult,
};
pub use config::{AgentProfile, ExecutorConfig, FlowConfig, OrchestratorConfig, StreamingConfig};
pub use error::{ConfigError, FlowError, FlowResult, PlanError, StreamError, TransportError};
pub use flow::{
    DataSourceCatalog, EnhancedAgentResponse, FlowController, FlowControllerBuilder, FlowMetadata,
    LearningRecorder, QueryCacheRecorder, QueryRequest,
};
pub use parallel::{
    ExecutionResult, ParallelExecutionGroup, ParallelExecutionPlan, ParallelExecutor,
    ParallelTask, TaskStatus,
};
pub use resources::{ResourceBudget, ResourceRequirements};
pub use streaming::{
    ChannelTransport, SessionStreamBroadcaster, StreamEvent, StreamEventKind, StreamTransport,
    StreamingContext,
};
