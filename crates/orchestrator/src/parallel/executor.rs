//! Parallel Executor Implementation
//!
//! Builds dependency-ordered execution groups and runs them. Failures,
//! panics and timeouts of a task are contained to that task: every planned
//! task yields exactly one [`ExecutionResult`].

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::graph::DependencyGraph;
use super::timeout::{run_guarded, GuardedOutcome};
use super::{
    ExecutionResult, ParallelExecutionGroup, ParallelExecutionPlan, ParallelTask, PlannedTask,
};
use crate::agents::AgentContext;
use crate::config::ExecutorConfig;
use crate::error::PlanError;
use crate::resources::ResourceBudget;

const CANCELLED: &str = "cancelled";

/// Dependency-aware executor with adaptive duration estimates
pub struct ParallelExecutor {
    config: ExecutorConfig,
    /// Rolling per-agent duration estimates
    estimates: DashMap<String, Duration>,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            estimates: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Current estimate for an agent: the rolling average when it has run
    /// before, the configured seed otherwise.
    pub fn estimated_duration(&self, agent_name: &str) -> Duration {
        self.estimates
            .get(agent_name)
            .map(|entry| *entry.value())
            .unwrap_or_else(|| {
                Duration::from_millis(self.config.profile(agent_name).estimated_time_ms)
            })
    }

    fn record_duration(&self, agent_name: &str, observed: Duration) {
        let seed = self.estimated_duration(agent_name);
        let mut entry = self.estimates.entry(agent_name.to_string()).or_insert(seed);
        *entry = (*entry + observed) / 2;
    }

    /// Partition tasks into dependency-ordered groups.
    pub fn create_execution_plan(
        &self,
        tasks: Vec<ParallelTask>,
        budget: &ResourceBudget,
    ) -> Result<ParallelExecutionPlan, PlanError> {
        let graph = DependencyGraph::build(
            tasks
                .iter()
                .map(|t| (t.name.as_str(), t.dependencies.as_slice())),
        )?;
        let levels = graph.levels()?;

        let estimates: HashMap<String, Duration> = tasks
            .iter()
            .map(|t| (t.name.clone(), self.estimated_duration(&t.name)))
            .collect();
        let mut by_name: HashMap<String, ParallelTask> =
            tasks.into_iter().map(|t| (t.name.clone(), t)).collect();

        let mut groups = Vec::with_capacity(levels.len());
        for (index, level) in levels.iter().enumerate() {
            let mut planned: Vec<PlannedTask> = level
                .iter()
                .filter_map(|name| by_name.remove(name))
                .map(|task| {
                    let profile = self.config.profile(&task.name);
                    PlannedTask {
                        priority: profile.priority,
                        estimated_time: estimates
                            .get(&task.name)
                            .copied()
                            .unwrap_or_default(),
                        resource_requirements: profile.resources,
                        task,
                    }
                })
                .collect();

            planned.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.name().cmp(b.name()))
            });

            let fit = budget.concurrent_fit(planned.iter().map(|t| &t.resource_requirements));
            let max_concurrency = self.config.max_concurrency.min(fit).max(1);

            groups.push(ParallelExecutionGroup {
                id: Uuid::new_v4(),
                name: format!("group-{}", index + 1),
                tasks: planned,
                max_concurrency,
                timeout: self.config.group_timeout(),
            });
        }

        let (critical_path, critical_path_time) = graph.critical_path(&estimates);
        let total_estimated_time: Duration = groups.iter().map(|g| g.estimated_time()).sum();

        info!(
            groups = groups.len(),
            tasks = graph.len(),
            critical_path = ?critical_path,
            critical_path_ms = critical_path_time.as_millis() as u64,
            total_estimated_ms = total_estimated_time.as_millis() as u64,
            "Created parallel execution plan"
        );

        Ok(ParallelExecutionPlan {
            groups,
            critical_path,
            critical_path_time,
            total_estimated_time,
        })
    }

    /// Run every group of the plan in order.
    pub async fn execute_parallel_plan(
        &self,
        plan: &ParallelExecutionPlan,
        context: Arc<AgentContext>,
    ) -> Vec<ExecutionResult> {
        self.execute_parallel_plan_with_cancel(plan, context, CancellationToken::new())
            .await
    }

    /// Run the plan, stopping early when `cancellation_token` fires. Tasks
    /// that were running or not yet started fail with "cancelled".
    pub async fn execute_parallel_plan_with_cancel(
        &self,
        plan: &ParallelExecutionPlan,
        context: Arc<AgentContext>,
        cancellation_token: CancellationToken,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(plan.task_count());

        for group in &plan.groups {
            if cancellation_token.is_cancelled() {
                warn!(group = %group.name, "Skipping group after cancellation");
                results.extend(
                    group
                        .tasks
                        .iter()
                        .map(|t| ExecutionResult::failed(t.name(), CANCELLED, Duration::ZERO)),
                );
                continue;
            }

            let group_results = self
                .execute_group(group, context.clone(), &cancellation_token)
                .await;
            results.extend(group_results);
        }

        results
    }

    /// Plan then execute, with the configured resource budget.
    pub async fn execute_tasks(
        &self,
        tasks: Vec<ParallelTask>,
        context: Arc<AgentContext>,
    ) -> Result<Vec<ExecutionResult>, PlanError> {
        let plan = self.create_execution_plan(tasks, &self.config.resource_budget)?;
        Ok(self.execute_parallel_plan(&plan, context).await)
    }

    async fn execute_group(
        &self,
        group: &ParallelExecutionGroup,
        context: Arc<AgentContext>,
        cancellation_token: &CancellationToken,
    ) -> Vec<ExecutionResult> {
        let started = Instant::now();
        let permits = group.tasks.len().min(group.max_concurrency).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        info!(
            group = %group.name,
            tasks = group.tasks.len(),
            max_concurrency = permits,
            "Executing parallel group"
        );

        let mut running = JoinSet::new();
        let mut results = Vec::with_capacity(group.tasks.len());

        // Permits are taken in dispatch order so higher priorities start first.
        for planned in &group.tasks {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit,
                _ = cancellation_token.cancelled() => {
                    results.push(ExecutionResult::failed(planned.name(), CANCELLED, Duration::ZERO));
                    continue;
                }
            };
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    results.push(ExecutionResult::failed(
                        planned.name(),
                        e.to_string(),
                        Duration::ZERO,
                    ));
                    continue;
                }
            };

            let name = planned.task.name.clone();
            let agent = planned.task.agent.clone();
            let ctx = context.clone();
            let timeout = group.timeout;
            let token = cancellation_token.clone();

            running.spawn(async move {
                let _permit = permit;
                let task_started = Instant::now();
                let outcome = run_guarded(&name, timeout, &token, async move {
                    agent.execute(&ctx).await
                })
                .await;
                let elapsed = task_started.elapsed();

                match outcome {
                    GuardedOutcome::Finished(Ok(response)) => {
                        ExecutionResult::completed(name, response, elapsed)
                    }
                    GuardedOutcome::Finished(Err(e)) => {
                        ExecutionResult::failed(name, format!("{e:#}"), elapsed)
                    }
                    GuardedOutcome::Panicked(message) => {
                        ExecutionResult::failed(name, message, elapsed)
                    }
                    GuardedOutcome::TimedOut(timeout) => ExecutionResult::timed_out(name, timeout),
                    GuardedOutcome::Cancelled => ExecutionResult::failed(name, CANCELLED, elapsed),
                }
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(group = %group.name, error = %e, "Task wrapper failed"),
            }
        }

        let reported: HashSet<String> = results.iter().map(|r| r.agent_name.clone()).collect();
        for planned in &group.tasks {
            if !reported.contains(planned.name()) {
                results.push(ExecutionResult::failed(
                    planned.name(),
                    "task did not report a result",
                    Duration::ZERO,
                ));
            }
        }

        for result in &results {
            if result.error.as_deref() != Some(CANCELLED) && result.execution_time > Duration::ZERO
            {
                self.record_duration(&result.agent_name, result.execution_time);
            }
            debug!(
                group = %group.name,
                agent = %result.agent_name,
                status = ?result.status,
                duration_ms = result.execution_time.as_millis() as u64,
                error = result.error.as_deref().unwrap_or(""),
                "Task finished"
            );
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            group = %group.name,
            succeeded,
            failed = results.len() - succeeded,
            duration_ms = started.elapsed().as_millis() as u64,
            "Parallel group finished"
        );

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentResponse};
    use crate::config::AgentProfile;
    use crate::parallel::TaskStatus;
    use crate::resources::ResourceRequirements;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedAgent {
        delay: Duration,
    }

    #[async_trait]
    impl Agent for FixedAgent {
        async fn execute(&self, _context: &AgentContext) -> Result<AgentResponse> {
            tokio::time::sleep(self.delay).await;
            Ok(AgentResponse::success(json!({})))
        }
    }

    fn task(name: &str, delay_ms: u64) -> ParallelTask {
        ParallelTask::new(
            name,
            Arc::new(FixedAgent {
                delay: Duration::from_millis(delay_ms),
            }),
        )
    }

    fn executor_with(profiles: &[(&str, u32, ResourceRequirements)]) -> ParallelExecutor {
        let mut config = ExecutorConfig::default();
        for (name, priority, resources) in profiles {
            config.agent_profiles.insert(
                name.to_string(),
                AgentProfile {
                    priority: *priority,
                    estimated_time_ms: 100,
                    resources: *resources,
                },
            );
        }
        ParallelExecutor::new(config)
    }

    #[test]
    fn test_dispatch_order_by_priority_then_name() {
        let light = ResourceRequirements::new(0.1, 10, 0.1);
        let executor = executor_with(&[
            ("low", 10, light),
            ("high", 90, light),
            ("b", 50, light),
            ("a", 50, light),
        ]);
        let plan = executor
            .create_execution_plan(
                vec![task("low", 0), task("b", 0), task("high", 0), task("a", 0)],
                &ResourceBudget::default(),
            )
            .expect("plan");

        let order: Vec<&str> = plan.groups[0].tasks.iter().map(|t| t.name()).collect();
        assert_eq!(order, vec!["high", "a", "b", "low"]);
    }

    #[test]
    fn test_concurrency_capped_by_resource_budget() {
        let heavy = ResourceRequirements::new(1.0, 100, 0.1);
        let executor = executor_with(&[("x", 50, heavy), ("y", 50, heavy), ("z", 50, heavy)]);
        let budget = ResourceBudget::new().cpu(2.0);
        let plan = executor
            .create_execution_plan(vec![task("x", 0), task("y", 0), task("z", 0)], &budget)
            .expect("plan");
        assert_eq!(plan.groups[0].max_concurrency, 2);
    }

    #[test]
    fn test_critical_path_is_reported() {
        let executor = ParallelExecutor::new(ExecutorConfig::default());
        let plan = executor
            .create_execution_plan(
                vec![task("a", 0), task("b", 0).depends_on("a"), task("c", 0)],
                &ResourceBudget::default(),
            )
            .expect("plan");
        assert_eq!(plan.critical_path, vec!["a", "b"]);
        assert_eq!(plan.critical_path_time, Duration::from_millis(2_000));
        assert_eq!(plan.total_estimated_time, Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn test_rolling_estimate_updates() {
        let executor = executor_with(&[("quick", 50, ResourceRequirements::default())]);
        assert_eq!(executor.estimated_duration("quick"), Duration::from_millis(100));

        let results = executor
            .execute_tasks(vec![task("quick", 0)], Arc::new(AgentContext::default()))
            .await
            .expect("execute");
        assert_eq!(results[0].status, TaskStatus::Completed);

        let observed = results[0].execution_time;
        assert_eq!(
            executor.estimated_duration("quick"),
            (Duration::from_millis(100) + observed) / 2
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start_fails_every_task() {
        let executor = ParallelExecutor::new(ExecutorConfig::default());
        let plan = executor
            .create_execution_plan(
                vec![task("a", 10), task("b", 10).depends_on("a")],
                &ResourceBudget::default(),
            )
            .expect("plan");

        let token = CancellationToken::new();
        token.cancel();
        let results = executor
            .execute_parallel_plan_with_cancel(&plan, Arc::new(AgentContext::default()), token)
            .await;

        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.error.as_deref() == Some("cancelled") && !r.success));
    }
}
