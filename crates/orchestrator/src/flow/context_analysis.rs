//! Conversation relevance analysis
//!
//! Decides whether a query continues the prior conversation and how much of
//! the history later stages should see. Filtering only drops messages; it
//! never reorders them.

use std::collections::HashSet;

use crate::agents::{ContextAnalysis, ConversationMessage, HistoryStrategy, MessageRole};

const FOLLOW_UP_CUES: &[&str] = &[
    "it", "that", "those", "this", "these", "them", "they", "also", "instead", "same", "again",
    "previous", "above", "earlier", "more",
];
const FOLLOW_UP_PREFIXES: &[&str] = &["what about", "how about", "and ", "why ", "compare"];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "what", "which", "who", "how", "with", "from",
    "that", "this", "those", "these", "have", "has", "show", "give", "tell", "about", "can",
    "you", "our", "all", "per", "into", "over",
];

/// Messages kept by the "recent" strategy
const RECENT_WINDOW: usize = 4;

pub trait ContextAnalyzer: Send + Sync {
    fn analyze(&self, query: &str, history: &[ConversationMessage]) -> ContextAnalysis;

    /// Apply the analysis' strategy to the history
    fn filter_history(
        &self,
        query: &str,
        history: &[ConversationMessage],
        analysis: &ContextAnalysis,
    ) -> Vec<ConversationMessage> {
        match analysis.strategy {
            HistoryStrategy::Full => history.to_vec(),
            HistoryStrategy::Recent(count) => {
                history[history.len().saturating_sub(count)..].to_vec()
            }
            HistoryStrategy::Relevant => {
                let query_terms = terms(query);
                history
                    .iter()
                    .filter(|m| !terms(&m.content).is_disjoint(&query_terms))
                    .cloned()
                    .collect()
            }
            HistoryStrategy::None => Vec::new(),
        }
    }
}

/// Lexical analyzer: follow-up cue words plus vocabulary overlap with the
/// user's earlier messages.
#[derive(Debug, Clone, Default)]
pub struct LexicalContextAnalyzer;

impl ContextAnalyzer for LexicalContextAnalyzer {
    fn analyze(&self, query: &str, history: &[ConversationMessage]) -> ContextAnalysis {
        if history.is_empty() {
            return ContextAnalysis::default();
        }

        let normalized = query.trim().to_lowercase();
        let query_terms = terms(&normalized);
        let history_terms: HashSet<String> = history
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .flat_map(|m| terms(&m.content))
            .collect();

        let relevance = if query_terms.is_empty() {
            0.0
        } else {
            query_terms.intersection(&history_terms).count() as f64 / query_terms.len() as f64
        };

        let has_cue = FOLLOW_UP_PREFIXES.iter().any(|p| normalized.starts_with(p))
            || normalized
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| FOLLOW_UP_CUES.contains(&word));

        let is_follow_up = has_cue || relevance >= 0.3;
        let is_new_topic = !is_follow_up && relevance < 0.1;

        let strategy = if is_follow_up && relevance >= 0.5 {
            HistoryStrategy::Full
        } else if is_follow_up {
            HistoryStrategy::Recent(RECENT_WINDOW)
        } else if !is_new_topic {
            HistoryStrategy::Relevant
        } else {
            HistoryStrategy::None
        };

        ContextAnalysis {
            is_follow_up,
            is_new_topic,
            relevance,
            strategy,
        }
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= 3 && !STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}
