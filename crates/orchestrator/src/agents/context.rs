//! Agent context passed to every agent invocation.
//!
//! A context is never mutated once an agent has seen it. Later stages derive
//! a new context through the `with_*` methods, which clone and extend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcomes::{
    CredibilityOutcome, CrossValidationOutcome, ExternalSearchOutcome, SynthesisOutcome,
};

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One message of the prior conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp: None,
        }
    }
}

/// Kind of a workspace data source; each kind has exactly one executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Database,
    File,
    External,
}

/// A connected workspace data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
}

impl DataSource {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// Outcome of querying one data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source_id: String,
    #[serde(default)]
    pub source_name: String,
    pub source_kind: SourceKind,
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How much of the conversation history later stages should see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy", content = "count")]
pub enum HistoryStrategy {
    /// Keep the whole (capped) history
    Full,
    /// Keep only the most recent messages
    Recent(usize),
    /// Keep messages sharing vocabulary with the current query
    Relevant,
    /// Drop the history entirely
    None,
}

impl HistoryStrategy {
    pub fn tag(&self) -> &'static str {
        match self {
            HistoryStrategy::Full => "full_history",
            HistoryStrategy::Recent(_) => "recent_history",
            HistoryStrategy::Relevant => "relevant_history",
            HistoryStrategy::None => "no_history",
        }
    }
}

/// Classification of the query against the prior conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub is_follow_up: bool,
    pub is_new_topic: bool,
    /// Lexical overlap between the query and the history, 0.0 to 1.0
    pub relevance: f64,
    pub strategy: HistoryStrategy,
}

impl Default for ContextAnalysis {
    fn default() -> Self {
        Self {
            is_follow_up: false,
            is_new_topic: true,
            relevance: 0.0,
            strategy: HistoryStrategy::None,
        }
    }
}

/// Filtered history plus the analysis that produced it, handed to the planner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub history: Vec<ConversationMessage>,
    pub analysis: ContextAnalysis,
}

/// Input of every agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub user_query: String,
    pub workspace_id: String,
    /// Ordered, relevance-filtered prior conversation
    pub conversation_history: Vec<ConversationMessage>,
    pub user_id: Option<String>,
    pub selected_data_sources: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_sources: Vec<DataSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relevant_sources: Vec<DataSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_results: Vec<SourceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_search: Option<ExternalSearchOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credibility: Option<CredibilityOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<CrossValidationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisOutcome>,
}

impl AgentContext {
    pub fn new(user_query: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            workspace_id: workspace_id.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_selected_sources(mut self, sources: Option<Vec<String>>) -> Self {
        self.selected_data_sources = sources;
        self
    }

    /// The rewritten query when a rewrite happened, the user's query otherwise
    pub fn effective_query(&self) -> &str {
        self.rewritten_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&self.user_query)
    }

    pub fn derive_with_rewritten_query(&self, query: impl Into<String>) -> Self {
        let mut derived = self.clone();
        derived.rewritten_query = Some(query.into());
        derived
    }

    pub fn derive_with_available_sources(&self, sources: Vec<DataSource>) -> Self {
        let mut derived = self.clone();
        derived.available_sources = sources;
        derived
    }

    pub fn derive_with_relevant_sources(&self, sources: Vec<DataSource>) -> Self {
        let mut derived = self.clone();
        derived.relevant_sources = sources;
        derived
    }

    pub fn derive_with_source_results(
        &self,
        results: Vec<SourceResult>,
        external_search: Option<ExternalSearchOutcome>,
    ) -> Self {
        let mut derived = self.clone();
        derived.source_results = results;
        derived.external_search = external_search;
        derived
    }

    pub fn derive_with_validation(
        &self,
        credibility: CredibilityOutcome,
        cross_validation: CrossValidationOutcome,
    ) -> Self {
        let mut derived = self.clone();
        derived.credibility = Some(credibility);
        derived.cross_validation = Some(cross_validation);
        derived
    }

    pub fn derive_with_synthesis(&self, synthesis: SynthesisOutcome) -> Self {
        let mut derived = self.clone();
        derived.synthesis = Some(synthesis);
        derived
    }

    /// Relevant sources owned by one executor kind
    pub fn relevant_sources_of(&self, kind: SourceKind) -> impl Iterator<Item = &DataSource> {
        self.relevant_sources.iter().filter(move |s| s.kind == kind)
    }
}
