//! Query request, aggregated response and per-stage bookkeeping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agents::{
    AgentResponse, ConversationMessage, CredibilityOutcome, CrossValidationOutcome, ExecutionPlan,
    HallucinationOutcome,
};

/// Caller input of [`FlowController::process_query`](super::FlowController::process_query)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub workspace_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Restricts the catalog to these source ids
    #[serde(default)]
    pub selected_data_sources: Option<Vec<String>>,
    /// Enables progress streaming under this id
    #[serde(default)]
    pub session_id: Option<String>,
}

impl QueryRequest {
    pub fn new(
        query: impl Into<String>,
        workspace_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            workspace_id: workspace_id.into(),
            agent_id: agent_id.into(),
            conversation_history: Vec::new(),
            user_id: None,
            selected_data_sources: None,
            session_id: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_selected_sources(mut self, source_ids: Vec<String>) -> Self {
        self.selected_data_sources = Some(source_ids);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Everything the flow learned while answering, beyond the answer itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowMetadata {
    pub execution_plan: Option<ExecutionPlan>,
    pub credibility: Option<CredibilityOutcome>,
    pub cross_validation: Option<CrossValidationOutcome>,
    pub hallucination: Option<HallucinationOutcome>,
    /// Tag of the history strategy applied
    pub context_strategy: String,
    /// Agents actually invoked, in invocation order
    pub agents_executed: Vec<String>,
    /// Tokens per stage, stages reporting zero tokens omitted
    pub stage_tokens: BTreeMap<String, u64>,
    /// Critical path of the source execution stage
    pub critical_path: Vec<String>,
    /// Which gate ended the flow early, if any
    pub early_exit: Option<String>,
    pub external_search_used: bool,
}

/// The aggregated answer returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedAgentResponse {
    pub content: String,
    pub success: bool,
    pub data_sources_used: Vec<String>,
    pub processing_time_ms: u64,
    pub tokens_used: u64,
    pub estimated_credits: f64,
    pub confidence_score: f64,
    pub follow_up_suggestions: Vec<String>,
    pub visualization: Option<serde_json::Value>,
    pub metadata: FlowMetadata,
    pub error: Option<String>,
}

impl EnhancedAgentResponse {
    pub fn answer(content: impl Into<String>, confidence_score: f64) -> Self {
        Self {
            content: content.into(),
            success: true,
            data_sources_used: Vec::new(),
            processing_time_ms: 0,
            tokens_used: 0,
            estimated_credits: 0.0,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            follow_up_suggestions: Vec::new(),
            visualization: None,
            metadata: FlowMetadata::default(),
            error: None,
        }
    }

    pub fn failure(content: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            confidence_score: 0.0,
            ..Self::answer(content, 0.0)
        }
    }

    pub fn with_follow_ups(mut self, suggestions: Vec<String>) -> Self {
        self.follow_up_suggestions = suggestions;
        self
    }
}

/// Token accounting per stage
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    stages: BTreeMap<String, u64>,
}

impl TokenLedger {
    /// Record a stage's usage; zero or absent usage is not recorded.
    pub fn record(&mut self, stage: &str, response: &AgentResponse) {
        let tokens = response.tokens_used();
        if tokens > 0 {
            *self.stages.entry(stage.to_string()).or_insert(0) += tokens;
        }
    }

    pub fn total(&self) -> u64 {
        self.stages.values().sum()
    }

    pub fn stages(&self) -> &BTreeMap<String, u64> {
        &self.stages
    }

    pub fn estimated_credits(&self, credits_per_thousand_tokens: f64) -> f64 {
        self.total() as f64 / 1000.0 * credits_per_thousand_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ledger_skips_zero_usage() {
        let mut ledger = TokenLedger::default();
        ledger.record("GreetingAgent", &AgentResponse::success(json!({})));
        ledger.record("GuardrailsAgent", &AgentResponse::success(json!({})).with_tokens(120));
        ledger.record("SynthesisAgent", &AgentResponse::success(json!({})).with_tokens(880));

        assert_eq!(ledger.total(), 1000);
        assert!(!ledger.stages().contains_key("GreetingAgent"));
        assert!((ledger.estimated_credits(2.5) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_response_shape() {
        let response = EnhancedAgentResponse::failure("Sorry", "boom");
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("boom"));
        assert_eq!(response.confidence_score, 0.0);
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: QueryRequest = serde_json::from_value(json!({
            "query": "hello",
            "workspace_id": "ws-1",
            "agent_id": "agent-1"
        }))
        .expect("decode request");
        assert!(request.conversation_history.is_empty());
        assert_eq!(request.session_id, None);
    }
}
