//! Dependency leveling
//!
//! Services are grouped into levels with Kahn's algorithm: level 0 has no
//! dependencies, level k only depends on levels below k. Services within a
//! level can be checked concurrently.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::model::{ServiceDescriptor, ServiceId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// Every service that sits on some cycle, sorted
    #[error("cyclic dependency detected between: {}", .services.join(", "))]
    CycleDetected { services: Vec<ServiceId> },

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        service: ServiceId,
        dependency: ServiceId,
    },
}

/// Ordered start levels
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Levels(pub Vec<BTreeSet<ServiceId>>);

impl Levels {
    pub fn iter(&self) -> impl Iterator<Item = &BTreeSet<ServiceId>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Services flattened in start order
    pub fn ordered(&self) -> Vec<ServiceId> {
        self.0.iter().flat_map(|l| l.iter().cloned()).collect()
    }

    /// Level index of a service
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.0.iter().position(|l| l.contains(id))
    }
}

/// Compute start levels for a set of descriptors
pub fn resolve(services: &BTreeMap<ServiceId, ServiceDescriptor>) -> Result<Levels, TopologyError> {
    let graph: BTreeMap<&str, BTreeSet<&str>> = services
        .iter()
        .map(|(id, svc)| (id.as_str(), svc.depends_on.iter().map(String::as_str).collect()))
        .collect();
    resolve_graph(&graph)
}

/// Kahn's algorithm over a name -> dependencies map
pub fn resolve_graph(graph: &BTreeMap<&str, BTreeSet<&str>>) -> Result<Levels, TopologyError> {
    for (id, deps) in graph {
        for dep in deps {
            if !graph.contains_key(dep) {
                return Err(TopologyError::UnknownDependency {
                    service: id.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }
    }

    // Remaining unresolved dependencies per service
    let mut pending: BTreeMap<&str, usize> =
        graph.iter().map(|(id, deps)| (*id, deps.len())).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, deps) in graph {
        for dep in deps {
            dependents.entry(*dep).or_default().push(*id);
        }
    }

    let mut levels = Vec::new();
    let mut current: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();

    while !current.is_empty() {
        let mut next = BTreeSet::new();
        for id in &current {
            pending.remove(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(n) = pending.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        next.insert(*dependent);
                    }
                }
            }
        }
        levels.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    if !pending.is_empty() {
        let remaining: BTreeSet<&str> = pending.keys().copied().collect();
        return Err(TopologyError::CycleDetected {
            services: cycle_members(graph, &remaining),
        });
    }

    Ok(Levels(levels))
}

/// Services on a cycle: strongly connected components with more than one
/// member, plus self-loops. Nodes that merely depend on a cycle are excluded.
fn cycle_members(graph: &BTreeMap<&str, BTreeSet<&str>>, remaining: &BTreeSet<&str>) -> Vec<ServiceId> {
    struct Tarjan<'a> {
        graph: &'a BTreeMap<&'a str, BTreeSet<&'a str>>,
        remaining: &'a BTreeSet<&'a str>,
        index: usize,
        indices: BTreeMap<&'a str, usize>,
        lowlink: BTreeMap<&'a str, usize>,
        stack: Vec<&'a str>,
        on_stack: BTreeSet<&'a str>,
        members: BTreeSet<&'a str>,
    }

    impl<'a> Tarjan<'a> {
        fn visit(&mut self, node: &'a str) {
            self.indices.insert(node, self.index);
            self.lowlink.insert(node, self.index);
            self.index += 1;
            self.stack.push(node);
            self.on_stack.insert(node);

            let graph = self.graph;
            for dep in graph.get(node).into_iter().flatten() {
                if !self.remaining.contains(dep) {
                    continue;
                }
                if !self.indices.contains_key(dep) {
                    self.visit(*dep);
                    let low = self.lowlink[node].min(self.lowlink[dep]);
                    self.lowlink.insert(node, low);
                } else if self.on_stack.contains(dep) {
                    let low = self.lowlink[node].min(self.indices[dep]);
                    self.lowlink.insert(node, low);
                }
            }

            if self.lowlink[node] == self.indices[node] {
                let mut component = Vec::new();
                while let Some(top) = self.stack.pop() {
                    self.on_stack.remove(top);
                    component.push(top);
                    if top == node {
                        break;
                    }
                }
                let self_loop = graph.get(node).is_some_and(|deps| deps.contains(node));
                if component.len() > 1 || self_loop {
                    self.members.extend(component);
                }
            }
        }
    }

    let mut t = Tarjan {
        graph,
        remaining,
        index: 0,
        indices: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        stack: Vec::new(),
        on_stack: BTreeSet::new(),
        members: BTreeSet::new(),
    };
    for node in remaining {
        if !t.indices.contains_key(node) {
            t.visit(*node);
        }
    }
    t.members.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn graph<'a>(edges: Vec<(&'a str, Vec<&'a str>)>) -> BTreeMap<&'a str, BTreeSet<&'a str>> {
        edges
            .into_iter()
            .map(|(id, deps)| (id, deps.into_iter().collect()))
            .collect()
    }

    fn names(level: &BTreeSet<ServiceId>) -> Vec<&str> {
        level.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_levels_for_typical_stack() {
        let g = graph(vec![
            ("db", vec![]),
            ("cache", vec![]),
            ("backend", vec!["db", "cache"]),
            ("ui", vec!["backend"]),
        ]);
        let levels = resolve_graph(&g).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(names(&levels.0[0]), vec!["cache", "db"]);
        assert_eq!(names(&levels.0[1]), vec!["backend"]);
        assert_eq!(names(&levels.0[2]), vec!["ui"]);
        assert_eq!(levels.level_of("ui"), Some(2));
    }

    #[test]
    fn test_two_node_cycle_names_both() {
        let g = graph(vec![("a", vec!["b"]), ("b", vec!["a"])]);
        assert_eq!(
            resolve_graph(&g),
            Err(TopologyError::CycleDetected {
                services: vec!["a".into(), "b".into()]
            })
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let g = graph(vec![("a", vec!["a"]), ("b", vec![])]);
        assert_eq!(
            resolve_graph(&g),
            Err(TopologyError::CycleDetected {
                services: vec!["a".into()]
            })
        );
    }

    #[test]
    fn test_all_cycles_reported_but_not_their_dependents() {
        let g = graph(vec![
            ("a", vec!["b"]),
            ("b", vec!["a"]),
            ("c", vec!["d"]),
            ("d", vec!["e"]),
            ("e", vec!["c"]),
            ("f", vec!["a"]),
            ("g", vec![]),
        ]);
        let Err(TopologyError::CycleDetected { services }) = resolve_graph(&g) else {
            panic!("expected cycle");
        };
        assert_eq!(services, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let g = graph(vec![("api", vec!["nope"])]);
        assert!(matches!(
            resolve_graph(&g),
            Err(TopologyError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_empty_graph() {
        let levels = resolve_graph(&BTreeMap::new()).unwrap();
        assert!(levels.is_empty());
    }

    proptest! {
        // Edges only point from higher to lower index, so the graph is acyclic
        #[test]
        fn prop_dependencies_live_in_earlier_levels(
            edges in proptest::collection::vec((1usize..12, 0usize..12), 0..40)
        ) {
            let ids: Vec<String> = (0..12).map(|i| format!("svc{}", i)).collect();
            let mut g: BTreeMap<&str, BTreeSet<&str>> =
                ids.iter().map(|id| (id.as_str(), BTreeSet::new())).collect();
            for (from, to) in edges {
                if to < from {
                    g.get_mut(ids[from].as_str()).unwrap().insert(ids[to].as_str());
                }
            }

            let levels = resolve_graph(&g).unwrap();
            prop_assert_eq!(levels.ordered().len(), ids.len());
            for (id, deps) in &g {
                let k = levels.level_of(id).unwrap();
                for dep in deps {
                    prop_assert!(levels.level_of(dep).unwrap() < k);
                }
            }
        }
    }
}
