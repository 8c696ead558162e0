// Agents module - contracts every pipeline agent implements, plus the typed
// views the flow decodes agent payloads into.

pub mod context;
pub mod outcomes;
pub mod planner;
pub mod response;

pub use context::{
    AgentContext, ContextAnalysis, ConversationContext, ConversationMessage, DataSource,
    HistoryStrategy, MessageRole, SourceKind, SourceResult,
};
pub use outcomes::{
    CredibilityOutcome, CrossValidationOutcome, ExternalSearchHit, ExternalSearchOutcome,
    GreetingOutcome, GuardrailOutcome, HallucinationOutcome, HallucinationRisk, RewriteOutcome,
    SourceExecutionOutcome, SourceFilterOutcome, SynthesisOutcome, ValidationOutcome,
    VisualizationOutcome,
};
pub use planner::{ExecutionPlan, ExecutionPlanner};
pub use response::{AgentResponse, ResponseMetadata};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single narrow-purpose agent.
///
/// An `Err` is treated as the agent throwing: the caller isolates it
/// (parallel groups) or converts it into a stage failure (sequential stages).
/// A handled negative outcome should be an `Ok` response with
/// `success = false` instead.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse>;
}

/// Every agent role the query flow knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentKind {
    Greeting,
    Guardrails,
    Validation,
    PromptEngineering,
    DataSourceFilter,
    ExternalSearch,
    DatabaseExecution,
    FileExecution,
    ExternalExecution,
    SourceCredibility,
    CrossValidation,
    Synthesis,
    HallucinationDetection,
    Visual,
}

impl AgentKind {
    pub const ALL: [AgentKind; 14] = [
        AgentKind::Greeting,
        AgentKind::Guardrails,
        AgentKind::Validation,
        AgentKind::PromptEngineering,
        AgentKind::DataSourceFilter,
        AgentKind::ExternalSearch,
        AgentKind::DatabaseExecution,
        AgentKind::FileExecution,
        AgentKind::ExternalExecution,
        AgentKind::SourceCredibility,
        AgentKind::CrossValidation,
        AgentKind::Synthesis,
        AgentKind::HallucinationDetection,
        AgentKind::Visual,
    ];

    /// Name used in plans, priority tables and stream events
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Greeting => "GreetingAgent",
            AgentKind::Guardrails => "GuardrailsAgent",
            AgentKind::Validation => "ValidationAgent",
            AgentKind::PromptEngineering => "PromptEngineeringAgent",
            AgentKind::DataSourceFilter => "DataSourceFilterAgent",
            AgentKind::ExternalSearch => "ExternalSearchAgent",
            AgentKind::DatabaseExecution => "DatabaseExecutionAgent",
            AgentKind::FileExecution => "FileExecutionAgent",
            AgentKind::ExternalExecution => "ExternalExecutionAgent",
            AgentKind::SourceCredibility => "SourceCredibilityAgent",
            AgentKind::CrossValidation => "CrossValidationAgent",
            AgentKind::Synthesis => "SynthesisAgent",
            AgentKind::HallucinationDetection => "HallucinationDetectionAgent",
            AgentKind::Visual => "VisualAgent",
        }
    }

    /// Agents whose execution the planner may skip
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            AgentKind::SourceCredibility
                | AgentKind::CrossValidation
                | AgentKind::HallucinationDetection
                | AgentKind::Visual
        )
    }

    /// The executor responsible for a source kind
    pub fn executor_for(kind: SourceKind) -> AgentKind {
        match kind {
            SourceKind::Database => AgentKind::DatabaseExecution,
            SourceKind::File => AgentKind::FileExecution,
            SourceKind::External => AgentKind::ExternalExecution,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown agent kind '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_names_round_trip() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.as_str().parse::<AgentKind>(), Ok(kind));
        }
        assert!("NoSuchAgent".parse::<AgentKind>().is_err());
    }

    #[test]
    fn test_optional_agents() {
        assert!(AgentKind::Visual.is_optional());
        assert!(AgentKind::HallucinationDetection.is_optional());
        assert!(!AgentKind::Guardrails.is_optional());
        assert!(!AgentKind::Synthesis.is_optional());
    }

    #[test]
    fn test_executor_for_source_kind() {
        assert_eq!(
            AgentKind::executor_for(SourceKind::File),
            AgentKind::FileExecution
        );
        assert_eq!(
            AgentKind::executor_for(SourceKind::Database),
            AgentKind::DatabaseExecution
        );
    }
}
