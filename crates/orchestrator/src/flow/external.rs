//! Detection of queries that need knowledge outside the workspace

/// Decides whether external search should run for a query
pub trait ExternalDataPredicate: Send + Sync {
    fn needs_external_data(&self, query: &str) -> bool;
}

/// Matches a configurable set of cues. Single-word cues must match a whole
/// word; multi-word cues match as a phrase.
#[derive(Debug, Clone)]
pub struct LexicalCuePredicate {
    cues: Vec<String>,
}

impl LexicalCuePredicate {
    pub fn new<I, S>(cues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            cues: cues
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

impl ExternalDataPredicate for LexicalCuePredicate {
    fn needs_external_data(&self, query: &str) -> bool {
        let normalized = query.to_lowercase();
        let words: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        self.cues.iter().any(|cue| {
            if cue.contains(char::is_whitespace) {
                normalized.contains(cue.as_str())
            } else {
                words.contains(&cue.as_str())
            }
        })
    }
}
