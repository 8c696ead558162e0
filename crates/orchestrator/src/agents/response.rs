//! Agent response contract

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Metadata attached to an agent response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// LLM tokens consumed by this invocation; absent counts as zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What every agent returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

impl AgentResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.metadata.get_or_insert_with(ResponseMetadata::default).tokens_used = Some(tokens);
        self
    }

    /// Tokens consumed; zero when not reported
    pub fn tokens_used(&self) -> u64 {
        self.metadata
            .as_ref()
            .and_then(|m| m.tokens_used)
            .unwrap_or(0)
    }

    /// Decode the payload into a stage outcome. A null payload yields the
    /// outcome's neutral default.
    pub fn decode<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned + Default,
    {
        if self.data.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.data.clone())
    }

    /// Like [`decode`](Self::decode), logging and falling back to the default
    /// on malformed payloads.
    pub fn decode_or_default<T>(&self, stage: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.decode() {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(stage = %stage, error = %e, "Malformed agent payload, using neutral outcome");
                T::default()
            }
        }
    }
}
