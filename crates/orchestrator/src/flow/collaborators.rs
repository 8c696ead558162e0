//! External collaborators consumed by the flow controller.
//!
//! The recorders are fire-and-forget: the controller calls them on a spawned
//! task and only logs their failures.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::DataSource;

/// Lists the data sources connected to a workspace
#[async_trait]
pub trait DataSourceCatalog: Send + Sync {
    async fn list_sources(&self, workspace_id: &str) -> Result<Vec<DataSource>>;
}

/// One answered query, as seen by the learning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub query: String,
    pub workspace_id: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub success: bool,
    pub confidence: f64,
    pub processing_time_ms: u64,
    pub tokens_used: u64,
    pub agents_executed: Vec<String>,
    pub data_sources_used: Vec<String>,
}

#[async_trait]
pub trait LearningRecorder: Send + Sync {
    async fn record_interaction(&self, record: &InteractionRecord) -> Result<()>;
}

#[async_trait]
pub trait QueryCacheRecorder: Send + Sync {
    async fn record_query_execution(
        &self,
        query: &str,
        workspace_id: &str,
        user_id: Option<&str>,
        data_source_ids: &[String],
        success: bool,
        duration_ms: u64,
    ) -> Result<()>;
}
