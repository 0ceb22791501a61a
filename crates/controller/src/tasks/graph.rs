//! Circular dependency detection across a namespace
//!
//! Nodes are `BootDependency` names; an edge `A -> B` exists when `A` declares
//! `service: B`. External hosts never produce edges. The graph is rebuilt from
//! the current listing on every admission check and never cached.

use crate::crds::{BootDependency, ServiceDependency};
use crate::tasks::types::{Error, Result};
use kube::ResourceExt;
use std::collections::{HashMap, HashSet};

/// Result of an admission-time cycle check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleCheck {
    Acyclic,
    /// Cycle path with the repeated node at both ends, e.g. `[a, b, a]`
    Cycle(Vec<String>),
}

impl CycleCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, CycleCheck::Acyclic)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            CycleCheck::Acyclic => Ok(()),
            CycleCheck::Cycle(path) => Err(Error::CircularDependency { path }),
        }
    }
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

fn service_edges(dependencies: &[ServiceDependency]) -> Vec<String> {
    dependencies
        .iter()
        .filter_map(|dep| dep.service.clone())
        .collect()
}

impl DependencyGraph {
    /// Build from `(owner, declarations)` pairs; later pairs win on duplicate owners
    pub fn from_sets<'a>(sets: impl IntoIterator<Item = (&'a str, &'a [ServiceDependency])>) -> Self {
        let edges = sets
            .into_iter()
            .map(|(owner, deps)| (owner.to_string(), service_edges(deps)))
            .collect();
        Self { edges }
    }

    /// Graph of `existing` with `candidate` substituted for its stored version
    pub fn with_candidate(candidate: &BootDependency, existing: &[BootDependency]) -> Self {
        let namespace = candidate.namespace();
        let candidate_name = candidate.name_any();
        let existing_names: Vec<String> = existing.iter().map(ResourceExt::name_any).collect();

        let others = existing
            .iter()
            .zip(existing_names.iter())
            .filter(|(bd, name)| **name != candidate_name && bd.namespace() == namespace)
            .map(|(bd, name)| (name.as_str(), bd.spec.depends_on.as_slice()));

        Self::from_sets(others.chain(std::iter::once((
            candidate_name.as_str(),
            candidate.spec.depends_on.as_slice(),
        ))))
    }

    pub fn dependencies_of(&self, node: &str) -> &[String] {
        self.edges.get(node).map_or(&[], Vec::as_slice)
    }

    /// Depth-first search from `start`, returning the first cycle found
    pub fn find_cycle_from(&self, start: &str) -> CycleCheck {
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut explored: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        match self.dfs(start, &mut on_path, &mut explored, &mut path) {
            Some(cycle) => CycleCheck::Cycle(cycle),
            None => CycleCheck::Acyclic,
        }
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        on_path: &mut HashSet<&'a str>,
        explored: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if on_path.contains(node) {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        // Fully explored through another branch without closing a loop
        if explored.contains(node) {
            return None;
        }

        on_path.insert(node);
        path.push(node);

        for next in self.dependencies_of(node) {
            if let Some(cycle) = self.dfs(next, on_path, explored, path) {
                return Some(cycle);
            }
        }

        path.pop();
        on_path.remove(node);
        explored.insert(node);
        None
    }
}

/// Admission gate: would admitting `candidate` close a dependency loop?
pub fn check(candidate: &BootDependency, existing: &[BootDependency]) -> CycleCheck {
    DependencyGraph::with_candidate(candidate, existing).find_cycle_from(&candidate.name_any())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::BootDependencySpec;

    fn bd(namespace: &str, name: &str, services: &[&str]) -> BootDependency {
        let mut bd = BootDependency::new(
            name,
            BootDependencySpec {
                depends_on: services
                    .iter()
                    .map(|s| ServiceDependency::service(s, 8080))
                    .collect(),
            },
        );
        bd.metadata.namespace = Some(namespace.to_string());
        bd
    }

    fn path(nodes: &[&str]) -> CycleCheck {
        CycleCheck::Cycle(nodes.iter().map(|n| (*n).to_string()).collect())
    }

    #[test]
    fn test_three_node_cycle_detected_from_every_entry_point() {
        let existing = vec![
            bd("default", "a", &["b"]),
            bd("default", "b", &["c"]),
            bd("default", "c", &["a"]),
        ];

        assert_eq!(check(&existing[0], &existing), path(&["a", "b", "c", "a"]));
        assert_eq!(check(&existing[1], &existing), path(&["b", "c", "a", "b"]));
        assert_eq!(check(&existing[2], &existing), path(&["c", "a", "b", "c"]));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let existing = vec![
            bd("default", "a", &["b", "c"]),
            bd("default", "b", &["d"]),
            bd("default", "c", &["d"]),
            bd("default", "d", &[]),
        ];

        for candidate in &existing {
            assert!(check(candidate, &existing).is_ok(), "{}", candidate.name_any());
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let candidate = bd("default", "a", &["a"]);
        assert_eq!(check(&candidate, &[]), path(&["a", "a"]));
    }

    #[test]
    fn test_create_closing_a_two_node_loop_is_rejected() {
        let existing = vec![bd("default", "svc-b", &["svc-c"])];
        let candidate = bd("default", "svc-c", &["svc-b"]);

        let result = check(&candidate, &existing).into_result();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("circular dependency"));
        assert!(err.to_string().contains("svc-c → svc-b → svc-c"));
    }

    #[test]
    fn test_update_is_checked_against_new_edges() {
        // Stored version of "a" still points at "b", the update drops it
        let existing = vec![bd("default", "a", &["b"]), bd("default", "b", &["a"])];
        let update = bd("default", "a", &["postgres"]);

        assert!(check(&update, &existing).is_ok());
    }

    #[test]
    fn test_external_hosts_never_form_edges() {
        let mut candidate = bd("default", "a", &[]);
        candidate.spec.depends_on = vec![ServiceDependency::host("a", 5432)];

        assert!(check(&candidate, &[]).is_ok());
    }

    #[test]
    fn test_other_namespaces_are_ignored() {
        let existing = vec![bd("other", "b", &["a"])];
        let candidate = bd("default", "a", &["b"]);

        assert!(check(&candidate, &existing).is_ok());
    }

    #[test]
    fn test_undeclared_dependencies_are_leaves() {
        let candidate = bd("default", "api", &["postgres", "redis"]);
        assert!(check(&candidate, &[]).is_ok());
    }

    #[test]
    fn test_shared_node_reached_twice_is_not_flagged() {
        let graph = DependencyGraph::from_sets(vec![
            ("a", [ServiceDependency::service("shared", 80), ServiceDependency::service("b", 80)].as_slice()),
            ("b", [ServiceDependency::service("shared", 80)].as_slice()),
            ("shared", [ServiceDependency::service("leaf", 80)].as_slice()),
        ]);
        assert_eq!(graph.find_cycle_from("a"), CycleCheck::Acyclic);
    }
}
