//! Parallel agent execution
//!
//! Tasks are partitioned into dependency levels ("groups"). Groups run one
//! after another; the tasks of a group run concurrently under a semaphore
//! sized from the configured concurrency cap and the resource budget.

pub mod executor;
mod graph;
pub mod timeout;

pub use executor::ParallelExecutor;
pub use timeout::{run_guarded, GuardedOutcome};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::agents::{Agent, AgentKind, AgentResponse};
use crate::resources::ResourceRequirements;

/// An agent invocation submitted for parallel execution
#[derive(Clone)]
pub struct ParallelTask {
    pub name: String,
    pub agent: Arc<dyn Agent>,
    /// Names of tasks that must finish in an earlier group
    pub dependencies: Vec<String>,
}

impl ParallelTask {
    pub fn new(name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            name: name.into(),
            agent,
            dependencies: Vec::new(),
        }
    }

    pub fn for_kind(kind: AgentKind, agent: Arc<dyn Agent>) -> Self {
        Self::new(kind.as_str(), agent)
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

impl fmt::Debug for ParallelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelTask")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A task with its scheduling attributes resolved
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub task: ParallelTask,
    pub priority: u32,
    pub estimated_time: Duration,
    pub resource_requirements: ResourceRequirements,
}

impl PlannedTask {
    pub fn name(&self) -> &str {
        &self.task.name
    }
}

/// Mutually independent tasks executed concurrently
#[derive(Debug, Clone)]
pub struct ParallelExecutionGroup {
    pub id: Uuid,
    pub name: String,
    /// Tasks in dispatch order (highest priority first)
    pub tasks: Vec<PlannedTask>,
    pub max_concurrency: usize,
    /// Deadline applied to each task of the group
    pub timeout: Duration,
}

impl ParallelExecutionGroup {
    /// Longest single estimate; the group's expected wall time
    pub fn estimated_time(&self) -> Duration {
        self.tasks
            .iter()
            .map(|t| t.estimated_time)
            .max()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ParallelExecutionPlan {
    pub groups: Vec<ParallelExecutionGroup>,
    /// Longest dependency chain by summed estimate, root first. Advisory.
    pub critical_path: Vec<String>,
    pub critical_path_time: Duration,
    pub total_estimated_time: Duration,
}

impl ParallelExecutionPlan {
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(|g| g.tasks.len()).sum()
    }

    /// Index of the group holding `name`
    pub fn group_of(&self, name: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.tasks.iter().any(|t| t.name() == name))
    }
}

/// Terminal state of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    TimedOut,
}

/// Exactly one per planned task
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub agent_name: String,
    pub result: Option<AgentResponse>,
    pub execution_time: Duration,
    /// The agent returned a response (which may itself report failure)
    pub success: bool,
    pub error: Option<String>,
    pub status: TaskStatus,
}

impl ExecutionResult {
    pub(crate) fn completed(
        agent_name: impl Into<String>,
        response: AgentResponse,
        execution_time: Duration,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            result: Some(response),
            execution_time,
            success: true,
            error: None,
            status: TaskStatus::Completed,
        }
    }

    pub(crate) fn failed(
        agent_name: impl Into<String>,
        error: impl Into<String>,
        execution_time: Duration,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            result: None,
            execution_time,
            success: false,
            error: Some(error.into()),
            status: TaskStatus::Failed,
        }
    }

    pub(crate) fn timed_out(agent_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent_name: agent_name.into(),
            result: None,
            execution_time: timeout,
            success: false,
            error: Some(format!("timed out after {}ms", timeout.as_millis())),
            status: TaskStatus::TimedOut,
        }
    }

    /// The agent's response when it both returned and reported success
    pub fn successful_response(&self) -> Option<&AgentResponse> {
        self.result.as_ref().filter(|r| self.success && r.success)
    }
}
