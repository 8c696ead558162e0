//! Dependency graph helpers for the parallel executor.
//!
//! Edges point from a dependency to the task waiting on it.

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use crate::error::PlanError;

#[derive(Debug, Clone, Default)]
pub(crate) struct DependencyGraph {
    graph: DiGraph<String, ()>,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicate names and unknown dependencies.
    pub(crate) fn build<'a, I>(tasks: I) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut declared: BTreeMap<&str, &[String]> = BTreeMap::new();
        for (name, deps) in tasks {
            if declared.insert(name, deps).is_some() {
                return Err(PlanError::DuplicateTask(name.to_string()));
            }
        }

        let mut graph = DiGraph::with_capacity(declared.len(), 0);
        let nodes: HashMap<&str, NodeIndex> = declared
            .keys()
            .map(|name| (*name, graph.add_node(name.to_string())))
            .collect();

        for (task, deps) in &declared {
            let Some(&to) = nodes.get(task) else {
                continue;
            };
            for dep in deps.iter() {
                let Some(&from) = nodes.get(dep.as_str()) else {
                    return Err(PlanError::UnknownDependency {
                        task: task.to_string(),
                        dependency: dep.clone(),
                    });
                };
                graph.update_edge(from, to, ());
            }
        }

        Ok(Self { graph })
    }

    pub(crate) fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Partition into levels: each level holds every task whose dependencies
    /// all sit in strictly earlier levels. Names within a level are sorted.
    pub(crate) fn levels(&self) -> Result<Vec<Vec<String>>, PlanError> {
        let order = toposort(&self.graph, None).map_err(|_| PlanError::CyclicDependency {
            remaining: self.blocked_by_cycles(),
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        let mut levels: Vec<Vec<String>> = Vec::new();
        for node in order {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, level);

            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(self.graph[node].clone());
        }

        for level in &mut levels {
            level.sort();
        }
        Ok(levels)
    }

    /// Tasks on a cycle plus everything downstream of one, sorted.
    fn blocked_by_cycles(&self) -> Vec<String> {
        let mut blocked = BTreeSet::new();
        for component in tarjan_scc(&self.graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|n| self.graph.contains_edge(*n, *n));
            if !cyclic {
                continue;
            }
            for start in component {
                let mut dfs = Dfs::new(&self.graph, start);
                while let Some(node) = dfs.next(&self.graph) {
                    blocked.insert(self.graph[node].clone());
                }
            }
        }
        blocked.into_iter().collect()
    }

    /// Longest chain by summed estimate, root first. Empty on a cyclic graph.
    pub(crate) fn critical_path(
        &self,
        estimates: &HashMap<String, Duration>,
    ) -> (Vec<String>, Duration) {
        let Ok(order) = toposort(&self.graph, None) else {
            return (Vec::new(), Duration::ZERO);
        };

        // Ties go to the lexically smaller name.
        let heavier = |a: (NodeIndex, Duration), b: (NodeIndex, Duration)| {
            a.1.cmp(&b.1)
                .then_with(|| self.graph[b.0].cmp(&self.graph[a.0]))
        };

        let mut finish: HashMap<NodeIndex, (Duration, Option<NodeIndex>)> = HashMap::new();
        for node in order {
            let own = estimates
                .get(&self.graph[node])
                .copied()
                .unwrap_or_default();
            let slowest_dep = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|dep| finish.get(&dep).map(|(t, _)| (dep, *t)))
                .max_by(|a, b| heavier(*a, *b));

            let entry = match slowest_dep {
                Some((dep, time)) => (time + own, Some(dep)),
                None => (own, None),
            };
            finish.insert(node, entry);
        }

        let Some((leaf, total)) = finish
            .iter()
            .map(|(node, (time, _))| (*node, *time))
            .max_by(|a, b| heavier(*a, *b))
        else {
            return (Vec::new(), Duration::ZERO);
        };

        let mut path = vec![self.graph[leaf].clone()];
        let mut cursor = finish.get(&leaf).and_then(|(_, prev)| *prev);
        while let Some(prev) = cursor {
            path.push(self.graph[prev].clone());
            cursor = finish.get(&prev).and_then(|(_, p)| *p);
        }
        path.reverse();

        (path, total)
    }
}
