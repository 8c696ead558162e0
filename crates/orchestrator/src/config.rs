//! Orchestrator configuration
//!
//! Loaded from TOML with serde defaults for every field, then overridden from
//! `QUERY_FLOW_*` environment variables. Per-agent priorities, duration
//! estimates and resource requirements live here rather than in code, so a
//! new agent kind only needs a config entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::agents::AgentKind;
use crate::error::ConfigError;
use crate::resources::{ResourceBudget, ResourceRequirements};

pub const ENV_PREFIX: &str = "QUERY_FLOW";

/// Scheduling profile of one agent kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    /// Dispatch priority inside a group; higher runs first
    pub priority: u32,
    /// Seed for the rolling duration estimate
    pub estimated_time_ms: u64,
    pub resources: ResourceRequirements,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            priority: 50,
            estimated_time_ms: 1_000,
            resources: ResourceRequirements::default(),
        }
    }
}

impl AgentProfile {
    fn new(priority: u32, estimated_time_ms: u64, resources: ResourceRequirements) -> Self {
        Self {
            priority,
            estimated_time_ms,
            resources,
        }
    }
}

/// Parallel executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running tasks within one group
    pub max_concurrency: usize,
    /// Timeout applied to every task of a group (milliseconds)
    pub group_timeout_ms: u64,
    /// Profile used for agents missing from `agent_profiles`
    pub default_profile: AgentProfile,
    /// Profiles keyed by agent name. A configured table replaces the built-in one.
    pub agent_profiles: HashMap<String, AgentProfile>,
    /// Resources a group is allocated against
    pub resource_budget: ResourceBudget,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            group_timeout_ms: 30_000,
            default_profile: AgentProfile::default(),
            agent_profiles: default_agent_profiles(),
            resource_budget: ResourceBudget::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn group_timeout(&self) -> Duration {
        Duration::from_millis(self.group_timeout_ms)
    }

    pub fn profile(&self, agent_name: &str) -> &AgentProfile {
        self.agent_profiles
            .get(agent_name)
            .unwrap_or(&self.default_profile)
    }
}

/// Safety and validation agents outrank cosmetic ones.
fn default_agent_profiles() -> HashMap<String, AgentProfile> {
    let light = ResourceRequirements::new(0.2, 64, 0.1);
    let llm = ResourceRequirements::new(0.3, 128, 0.3);
    let heavy = ResourceRequirements::new(1.0, 512, 0.4);

    [
        (AgentKind::Guardrails, AgentProfile::new(100, 800, llm)),
        (AgentKind::Validation, AgentProfile::new(95, 800, llm)),
        (AgentKind::Greeting, AgentProfile::new(90, 300, light)),
        (AgentKind::PromptEngineering, AgentProfile::new(85, 1_200, llm)),
        (AgentKind::DataSourceFilter, AgentProfile::new(80, 1_000, llm)),
        (AgentKind::SourceCredibility, AgentProfile::new(75, 1_500, llm)),
        (AgentKind::CrossValidation, AgentProfile::new(75, 2_000, llm)),
        (AgentKind::HallucinationDetection, AgentProfile::new(70, 2_000, llm)),
        (AgentKind::DatabaseExecution, AgentProfile::new(65, 3_000, heavy)),
        (AgentKind::FileExecution, AgentProfile::new(65, 2_500, heavy)),
        (AgentKind::ExternalExecution, AgentProfile::new(60, 4_000, llm)),
        (AgentKind::ExternalSearch, AgentProfile::new(55, 3_000, llm)),
        (AgentKind::Synthesis, AgentProfile::new(50, 3_000, llm)),
        (AgentKind::Visual, AgentProfile::new(10, 1_500, light)),
    ]
    .into_iter()
    .map(|(kind, profile)| (kind.as_str().to_string(), profile))
    .collect()
}

/// Session streaming configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Sessions older than this are swept (milliseconds)
    pub session_idle_timeout_ms: u64,
    /// Interval of the background sweep (milliseconds)
    pub sweep_interval_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout_ms: 300_000,
            sweep_interval_ms: 120_000,
        }
    }
}

impl StreamingConfig {
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Flow controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Timeout for single-agent stages (milliseconds)
    pub stage_timeout_ms: u64,
    /// History messages kept before relevance filtering
    pub max_history_messages: usize,
    /// Credits charged per 1000 tokens
    pub credits_per_thousand_tokens: f64,
    /// Lexical cues signalling that a query needs outside knowledge
    pub external_data_cues: Vec<String>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 60_000,
            max_history_messages: 10,
            credits_per_thousand_tokens: 1.0,
            external_data_cues: [
                "latest",
                "current",
                "today",
                "news",
                "market",
                "industry",
                "benchmark",
                "competitor",
                "trend",
                "compare with",
                "according to",
                "on the web",
                "online",
                "public data",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl FlowConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub executor: ExecutorConfig,
    pub streaming: StreamingConfig,
    pub flow: FlowConfig,
}

impl OrchestratorConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: OrchestratorConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Loading orchestrator configuration");
        Self::from_toml_str(&raw)
    }

    /// File (if given) then process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `QUERY_FLOW_*` overrides from the given variables
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{ENV_PREFIX}_");
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            match name {
                "MAX_CONCURRENCY" => self.executor.max_concurrency = parse_override(&key, &value)?,
                "GROUP_TIMEOUT_MS" => self.executor.group_timeout_ms = parse_override(&key, &value)?,
                "SESSION_IDLE_TIMEOUT_MS" => {
                    self.streaming.session_idle_timeout_ms = parse_override(&key, &value)?
                }
                "SWEEP_INTERVAL_MS" => {
                    self.streaming.sweep_interval_ms = parse_override(&key, &value)?
                }
                "STAGE_TIMEOUT_MS" => self.flow.stage_timeout_ms = parse_override(&key, &value)?,
                "MAX_HISTORY_MESSAGES" => {
                    self.flow.max_history_messages = parse_override(&key, &value)?
                }
                "CREDITS_PER_THOUSAND_TOKENS" => {
                    self.flow.credits_per_thousand_tokens = parse_override(&key, &value)?
                }
                _ => tracing::debug!(key = %key, "Ignoring unknown configuration override"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.executor.group_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "executor.group_timeout_ms must be positive".to_string(),
            ));
        }
        if self.flow.stage_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "flow.stage_timeout_ms must be positive".to_string(),
            ));
        }
        if self.streaming.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "streaming.sweep_interval_ms must be positive".to_string(),
            ));
        }
        if self.flow.credits_per_thousand_tokens < 0.0 {
            return Err(ConfigError::Invalid(
                "flow.credits_per_thousand_tokens cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
        })
}
