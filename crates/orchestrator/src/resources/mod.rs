//! Resource Requirements and Budgets
//!
//! Per-agent resource requirements and the budget an execution group is
//! allocated against. Allocation is best-effort: it only shapes how many
//! tasks of a group are dispatched at once, it never rejects a task.

use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Resources one agent invocation is expected to consume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    /// CPU share in cores
    pub cpu: f32,

    /// Memory in megabytes
    pub memory_mb: u64,

    /// Share of the outbound network budget (0.0 to 1.0 per call)
    pub network: f32,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cpu: 0.1,
            memory_mb: 32,
            network: 0.1,
        }
    }
}

impl ResourceRequirements {
    pub fn new(cpu: f32, memory_mb: u64, network: f32) -> Self {
        Self {
            cpu,
            memory_mb,
            network,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0, 0.0)
    }
}

impl Add for ResourceRequirements {
    type Output = ResourceRequirements;

    fn add(self, rhs: Self) -> Self::Output {
        ResourceRequirements {
            cpu: self.cpu + rhs.cpu,
            memory_mb: self.memory_mb.saturating_add(rhs.memory_mb),
            network: self.network + rhs.network,
        }
    }
}

/// Resources available to one execution group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    pub cpu: f32,
    pub memory_mb: u64,
    pub network: f32,
}

/// Sized so the source executors and external search fit in one wave.
impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            cpu: 4.0,
            memory_mb: 2048,
            network: 2.0,
        }
    }
}

impl ResourceBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set CPU cores
    pub fn cpu(mut self, cores: f32) -> Self {
        self.cpu = cores;
        self
    }

    /// Set memory in megabytes
    pub fn memory_mb(mut self, megabytes: u64) -> Self {
        self.memory_mb = megabytes;
        self
    }

    /// Set network share
    pub fn network(mut self, share: f32) -> Self {
        self.network = share;
        self
    }

    /// Budget without limits
    pub fn unlimited() -> Self {
        Self {
            cpu: f32::MAX,
            memory_mb: u64::MAX,
            network: f32::MAX,
        }
    }

    pub fn can_accommodate(&self, requirements: &ResourceRequirements) -> bool {
        requirements.cpu <= self.cpu
            && requirements.memory_mb <= self.memory_mb
            && requirements.network <= self.network
    }

    /// Number of leading requirements (in dispatch order) that fit the budget
    /// together. Never less than one so a group always makes progress.
    pub fn concurrent_fit<'a, I>(&self, requirements: I) -> usize
    where
        I: IntoIterator<Item = &'a ResourceRequirements>,
    {
        let mut used = ResourceRequirements::zero();
        let mut fitted = 0;

        for requirement in requirements {
            let next = used + *requirement;
            if !self.can_accommodate(&next) {
                break;
            }
            used = next;
            fitted += 1;
        }

        fitted.max(1)
    }
}
