use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::{ConversationContext, DataSource};
use super::AgentKind;

/// The planner's decision about which optional agents run for one query.
///
/// Produced once per query and read-only afterwards. An agent listed in
/// neither `required_agents` nor `skip_agents` is implicitly required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub required_agents: Vec<String>,
    pub skip_agents: Vec<String>,
    pub estimated_time_ms: u64,
    /// Planner confidence, 0.0 to 1.0
    pub confidence: f64,
    pub reasoning: String,
}

impl ExecutionPlan {
    pub fn new(
        required_agents: Vec<String>,
        skip_agents: Vec<String>,
        estimated_time_ms: u64,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            required_agents,
            skip_agents,
            estimated_time_ms,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    /// Plan that runs every agent; used when no planner decision is available
    pub fn run_everything(reasoning: impl Into<String>) -> Self {
        Self::new(
            AgentKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            Vec::new(),
            0,
            0.5,
            reasoning,
        )
    }

    pub fn is_skipped(&self, agent_name: &str) -> bool {
        self.skip_agents.iter().any(|name| name == agent_name)
    }

    pub fn should_run(&self, kind: AgentKind) -> bool {
        !self.is_skipped(kind.as_str())
    }
}

/// Planner collaborator
#[async_trait]
pub trait ExecutionPlanner: Send + Sync {
    async fn create_execution_plan(
        &self,
        query: &str,
        available_sources: &[DataSource],
        conversation_context: &ConversationContext,
        user_id: Option<&str>,
    ) -> Result<ExecutionPlan>;
}
