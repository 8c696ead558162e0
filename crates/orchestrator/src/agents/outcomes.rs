//! Typed views over agent payloads.
//!
//! Agents return loosely-typed JSON in `AgentResponse::data`; the flow decodes
//! it into one of these structs per stage. Every field has a serde default so
//! a partial payload decodes to a neutral outcome rather than failing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::context::{DataSource, SourceResult};

fn default_true() -> bool {
    true
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreetingOutcome {
    pub is_greeting: bool,
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailOutcome {
    pub allowed: bool,
    pub reason: Option<String>,
    pub violations: Vec<String>,
}

impl Default for GuardrailOutcome {
    fn default() -> Self {
        Self {
            allowed: default_true(),
            reason: None,
            violations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub reason: Option<String>,
    /// Agent-authored clarification question, if any
    pub clarification: Option<String>,
    pub suggestions: Vec<String>,
}

impl Default for ValidationOutcome {
    fn default() -> Self {
        Self {
            is_valid: default_true(),
            reason: None,
            clarification: None,
            suggestions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteOutcome {
    pub rewritten_query: Option<String>,
    pub intent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFilterOutcome {
    pub sources: Vec<DataSource>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceExecutionOutcome {
    pub results: Vec<SourceResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSearchHit {
    pub title: String,
    pub url: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSearchOutcome {
    pub results: Vec<ExternalSearchHit>,
    pub summary: Option<String>,
}

/// Source trustworthiness. The default is the neutral "not assessed" value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityOutcome {
    pub overall_score: Option<f64>,
    pub source_scores: BTreeMap<String, f64>,
    pub notes: Vec<String>,
}

/// Inter-source agreement. The default is the neutral "not assessed" value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationOutcome {
    pub agreement_score: Option<f64>,
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOutcome {
    pub answer: String,
    pub confidence: f64,
    pub follow_up_suggestions: Vec<String>,
}

impl Default for SynthesisOutcome {
    fn default() -> Self {
        Self {
            answer: String::new(),
            confidence: default_confidence(),
            follow_up_suggestions: Vec::new(),
        }
    }
}

/// Estimated risk that the synthesized answer contains fabricated content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HallucinationRisk {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl HallucinationRisk {
    /// Factor applied to the prior confidence
    pub fn confidence_factor(&self) -> f64 {
        match self {
            HallucinationRisk::Critical => 0.3,
            HallucinationRisk::High => 0.5,
            HallucinationRisk::Low | HallucinationRisk::Medium => 1.0,
        }
    }

    pub fn disclaimer(&self) -> Option<&'static str> {
        match self {
            HallucinationRisk::Critical => Some(
                "⚠️ Reliability warning: parts of this answer could not be verified against \
                 your data sources and may be inaccurate. Please verify before relying on it.",
            ),
            HallucinationRisk::High => Some(
                "Note: some details in this answer may not be fully supported by your data \
                 sources.",
            ),
            HallucinationRisk::Low | HallucinationRisk::Medium => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HallucinationOutcome {
    pub risk: HallucinationRisk,
    pub score: Option<f64>,
    pub flagged_claims: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationOutcome {
    pub should_visualize: bool,
    pub chart_type: Option<String>,
    pub spec: serde_json::Value,
}

impl Default for VisualizationOutcome {
    fn default() -> Self {
        Self {
            should_visualize: default_true(),
            chart_type: None,
            spec: serde_json::Value::Null,
        }
    }
}

impl VisualizationOutcome {
    /// Payload exposed on the final response, if the plan is usable
    pub fn into_payload(self) -> Option<serde_json::Value> {
        if !self.should_visualize || self.spec.is_null() {
            return None;
        }
        Some(serde_json::json!({
            "chart_type": self.chart_type,
            "spec": self.spec,
        }))
    }
}
