//! Dependency graph over plan phases.
//!
//! Nodes are addressed by their position in the phase slice the graph was
//! built from. Dependency references are resolved by the `FINAL` sentinel,
//! then by leading phase number (`"2"`, `"Phase 2: Persistence"`), then by
//! exact title. References that match nothing are logged and dropped.

use std::collections::HashMap;

use tracing::warn;

use crate::errors::SchedulerError;
use crate::phase::Phase;
use crate::plan::{is_final_marker, leading_number};

/// Position of a phase within the graph.
pub type NodeIndex = usize;

/// A dependency reference that did not match any phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub phase_index: u32,
    pub reference: String,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Stable phase index per node
    phase_indices: Vec<u32>,
    /// node -> nodes that depend on it
    forward_edges: Vec<Vec<NodeIndex>>,
    /// node -> nodes it depends on
    reverse_edges: Vec<Vec<NodeIndex>>,
    unresolved: Vec<UnresolvedDependency>,
}

impl DependencyGraph {
    pub fn from_phases(phases: &[Phase]) -> Self {
        let by_index: HashMap<u32, NodeIndex> = phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.phase_index, i))
            .collect();
        let final_node = phases
            .iter()
            .enumerate()
            .max_by_key(|(i, p)| (p.execution_order, *i))
            .map(|(i, _)| i);

        let mut forward_edges = vec![Vec::new(); phases.len()];
        let mut reverse_edges = vec![Vec::new(); phases.len()];
        let mut unresolved = Vec::new();

        for (to, phase) in phases.iter().enumerate() {
            for reference in &phase.dependencies {
                let from = if is_final_marker(reference) {
                    final_node
                } else {
                    leading_number(reference)
                        .and_then(|n| by_index.get(&n).copied())
                        .or_else(|| by_title(phases, reference))
                };
                let Some(from) = from else {
                    warn!(
                        phase_index = phase.phase_index,
                        reference = %reference,
                        "Ignoring dependency on unknown phase"
                    );
                    unresolved.push(UnresolvedDependency {
                        phase_index: phase.phase_index,
                        reference: reference.clone(),
                    });
                    continue;
                };
                if reverse_edges[to].contains(&from) {
                    continue;
                }
                forward_edges[from].push(to);
                reverse_edges[to].push(from);
            }
        }

        Self {
            phase_indices: phases.iter().map(|p| p.phase_index).collect(),
            forward_edges,
            reverse_edges,
            unresolved,
        }
    }

    pub fn len(&self) -> usize {
        self.phase_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phase_indices.is_empty()
    }

    /// Stable phase index of a node.
    pub fn phase_index(&self, node: NodeIndex) -> Option<u32> {
        self.phase_indices.get(node).copied()
    }

    /// Nodes `node` waits on.
    pub fn dependencies(&self, node: NodeIndex) -> &[NodeIndex] {
        self.reverse_edges.get(node).map_or(&[], |v| v.as_slice())
    }

    /// Nodes waiting on `node`.
    pub fn dependents(&self, node: NodeIndex) -> &[NodeIndex] {
        self.forward_edges.get(node).map_or(&[], |v| v.as_slice())
    }

    /// Nodes with no dependencies.
    pub fn roots(&self) -> Vec<NodeIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn unresolved(&self) -> &[UnresolvedDependency] {
        &self.unresolved
    }

    /// Fail with the phases caught in (or behind) a cycle, if any.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.waves().map(|_| ())
    }

    /// Group nodes into waves: every node's dependencies sit in earlier waves.
    /// Waves hold phase indices in node order.
    pub fn waves(&self) -> Result<Vec<Vec<u32>>, SchedulerError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(Vec::len).collect();
        let mut current: Vec<NodeIndex> = self.roots();
        let mut waves = Vec::new();
        let mut processed = 0;

        while !current.is_empty() {
            processed += current.len();
            let mut next = Vec::new();
            for &node in &current {
                for &dependent in self.dependents(node) {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            waves.push(current.iter().map(|&n| self.phase_indices[n]).collect());
            current = next;
        }

        if processed != self.len() {
            let phases: Vec<u32> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.phase_indices[i])
                .collect();
            return Err(SchedulerError::DependencyCycle { phases });
        }
        Ok(waves)
    }
}

/// Node whose title equals the reference, ignoring case and surrounding
/// whitespace.
fn by_title(phases: &[Phase], reference: &str) -> Option<NodeIndex> {
    let wanted = reference.trim();
    if wanted.is_empty() {
        return None;
    }
    phases
        .iter()
        .position(|p| p.title.trim().eq_ignore_ascii_case(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(index: u32, deps: &[&str]) -> Phase {
        Phase::new(index, &format!("Phase {}", index))
            .with_execution_order(index)
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[test]
    fn test_diamond_waves() {
        let graph = DependencyGraph::from_phases(&[
            phase(1, &[]),
            phase(2, &["1"]),
            phase(3, &["Phase 1"]),
            phase(4, &["2", "3"]),
        ]);

        assert_eq!(graph.roots(), vec![0]);
        assert_eq!(graph.dependencies(3), &[1, 2]);
        assert_eq!(graph.waves().unwrap(), vec![vec![1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_cycle_is_reported_with_phase_indices() {
        let graph = DependencyGraph::from_phases(&[
            phase(1, &[]),
            phase(2, &["3"]),
            phase(3, &["2"]),
        ]);

        match graph.validate() {
            Err(SchedulerError::DependencyCycle { phases }) => assert_eq!(phases, vec![2, 3]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = DependencyGraph::from_phases(&[phase(1, &["1"])]);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_unknown_reference_is_ignored() {
        let graph = DependencyGraph::from_phases(&[phase(1, &["7", "setup"]), phase(2, &["1"])]);

        assert!(graph.dependencies(0).is_empty());
        assert_eq!(graph.unresolved().len(), 2);
        assert_eq!(graph.unresolved()[0].reference, "7");
        assert_eq!(graph.waves().unwrap(), vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_titled_references_resolve() {
        let graph = DependencyGraph::from_phases(&[
            Phase::new(1, "Scaffold"),
            Phase::new(2, "Persistence").with_dependencies(vec!["Phase 1: Scaffold".into()]),
            Phase::new(3, "Release").with_dependencies(vec!["1 (Phase 1)".into()]),
            Phase::new(4, "Docs").with_dependencies(vec!["persistence".into()]),
        ]);

        assert_eq!(graph.dependencies(1), &[0]);
        assert_eq!(graph.dependencies(2), &[0]);
        assert_eq!(graph.dependencies(3), &[1]);
        assert!(graph.unresolved().is_empty());
        assert_eq!(graph.waves().unwrap(), vec![vec![1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_final_marker_resolves_to_last_phase() {
        let graph = DependencyGraph::from_phases(&[
            phase(1, &[]),
            phase(3, &["FINAL"]),
            phase(2, &[]).with_execution_order(9),
        ]);
        assert_eq!(graph.dependencies(1), &[2]);
    }

    #[test]
    fn test_duplicate_references_collapse() {
        let graph = DependencyGraph::from_phases(&[phase(1, &[]), phase(2, &["1", "Phase 1"])]);
        assert_eq!(graph.dependencies(1), &[0]);
        assert_eq!(graph.dependents(0), &[1]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::from_phases(&[]);
        assert!(graph.is_empty());
        assert!(graph.waves().unwrap().is_empty());
    }
}
