//! # Phase Planning
//!
//! Greedy topological grouping: each phase holds every not-yet-placed task
//! whose dependencies are all placed in earlier phases.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::agents::AgentRegistry;

/// Ordered execution phases for a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePlan {
    /// Task ids per phase, registry order within a phase
    pub phases: Vec<Vec<String>>,
    /// True when a cycle or unknown dependency forced a terminal catch-all phase
    pub degraded: bool,
}

impl PhasePlan {
    /// Index of the phase containing `id`
    pub fn phase_of(&self, id: &str) -> Option<usize> {
        self.phases
            .iter()
            .position(|phase| phase.iter().any(|t| t == id))
    }
}

/// Compute execution phases.
///
/// If tasks remain that can never be placed (a cycle, or a dependency id that
/// is not registered), they are all flushed into one final phase rather than
/// deadlocking, and the plan is marked degraded.
pub fn compute_phases(registry: &AgentRegistry) -> PhasePlan {
    let mut placed: HashSet<String> = HashSet::new();
    let mut remaining: Vec<String> = registry.ids();
    let mut phases = Vec::new();
    let mut degraded = false;

    while !remaining.is_empty() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|id| {
                registry
                    .get(id)
                    .map(|task| task.depends_on().iter().all(|dep| placed.contains(dep)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        if ready.is_empty() {
            tracing::warn!(
                stuck = ?remaining,
                "Agent dependencies cannot be resolved (cycle or unknown id); running remaining tasks in one final phase"
            );
            degraded = true;
            phases.push(std::mem::take(&mut remaining));
            break;
        }

        remaining.retain(|id| !ready.contains(id));
        placed.extend(ready.iter().cloned());
        phases.push(ready);
    }

    PhasePlan { phases, degraded }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentTask;
    use std::sync::Arc;

    struct Node {
        id: String,
        deps: Vec<String>,
    }

    impl AgentTask for Node {
        fn id(&self) -> &str {
            &self.id
        }

        fn depends_on(&self) -> &[String] {
            &self.deps
        }
    }

    fn registry(graph: &[(&str, &[&str])]) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for (id, deps) in graph {
            registry
                .register(Arc::new(Node {
                    id: id.to_string(),
                    deps: deps.iter().map(|d| d.to_string()).collect(),
                }))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_five_task_graph_phases() {
        let registry = registry(&[
            ("A", &[]),
            ("B", &["A"]),
            ("C", &["A", "B"]),
            ("D", &["B"]),
            ("E", &["C", "D"]),
        ]);
        let plan = compute_phases(&registry);
        assert_eq!(
            plan.phases,
            vec![vec!["A"], vec!["B"], vec!["C", "D"], vec!["E"]]
        );
        assert!(!plan.degraded);
    }

    #[test]
    fn test_every_task_placed_once_after_its_dependencies() {
        let graph: &[(&str, &[&str])] = &[
            ("report", &["gaps", "ideas", "links"]),
            ("analyze", &[]),
            ("links", &["gaps"]),
            ("gaps", &["analyze"]),
            ("ideas", &["analyze", "gaps"]),
            ("trends", &[]),
        ];
        let registry = registry(graph);
        let plan = compute_phases(&registry);

        let mut seen = HashSet::new();
        for phase in &plan.phases {
            for id in phase {
                assert!(seen.insert(id.clone()), "{} placed twice", id);
            }
        }
        assert_eq!(seen.len(), graph.len());

        for (id, deps) in graph {
            let own = plan.phase_of(id).unwrap();
            for dep in *deps {
                assert!(plan.phase_of(dep).unwrap() < own, "{} before {}", dep, id);
            }
        }
    }

    #[test]
    fn test_cycle_degrades_to_terminal_phase() {
        let registry = registry(&[("A", &[]), ("B", &["C"]), ("C", &["B"])]);
        let plan = compute_phases(&registry);
        assert!(plan.degraded);
        assert_eq!(plan.phases, vec![vec!["A"], vec!["B", "C"]]);
    }

    #[test]
    fn test_unknown_dependency_degrades() {
        let registry = registry(&[("A", &["missing"])]);
        let plan = compute_phases(&registry);
        assert!(plan.degraded);
        assert_eq!(plan.phases, vec![vec!["A"]]);
    }

    #[test]
    fn test_empty_registry() {
        let plan = compute_phases(&AgentRegistry::new());
        assert!(plan.phases.is_empty());
        assert!(!plan.degraded);
    }
}
