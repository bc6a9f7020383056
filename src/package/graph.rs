use log::warn;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeMap, BTreeSet};

use super::PackageRecord;

/// Dependency graph over a set of records: an edge `A -> B` means A depends on B.
///
/// Dependencies naming packages outside the set are ignored.
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new(records: &[PackageRecord]) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = BTreeMap::new();

        for record in records {
            nodes
                .entry(record.name.clone())
                .or_insert_with(|| graph.add_node(record.name.clone()));
        }

        for record in records {
            let from = nodes[&record.name];
            for dep in record.dependency_names() {
                if dep == record.name {
                    continue;
                }
                if let Some(&to) = nodes.get(&dep) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        Self { graph, nodes }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// The seeds present in the graph plus every package depending on any of them,
    /// directly or transitively.
    pub fn dependents_closure(&self, seeds: &[&str]) -> BTreeSet<String> {
        let reversed = Reversed(&self.graph);
        let mut closure = BTreeSet::new();

        for seed in seeds {
            let Some(&start) = self.nodes.get(*seed) else {
                continue;
            };
            let mut dfs = Dfs::new(reversed, start);
            while let Some(node) = dfs.next(reversed) {
                closure.insert(self.graph[node].clone());
            }
        }

        closure
    }

    /// Package names ordered so every package comes after its dependencies.
    ///
    /// Among packages that are ready at the same time the smallest name goes first.
    /// A dependency cycle is broken by releasing its smallest remaining name.
    pub fn topological_order(&self) -> Vec<String> {
        let mut pending: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, &idx)| {
                let deps = self
                    .graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .count();
                (name.as_str(), deps)
            })
            .collect();

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(name, _)| *name)
            .collect();
        for name in &ready {
            pending.remove(name);
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        loop {
            let next = match ready.pop_first() {
                Some(name) => name,
                None => match pending.keys().next().copied() {
                    Some(name) => {
                        warn!("Dependency cycle detected, installing {} before its dependencies", name);
                        pending.remove(name);
                        name
                    }
                    None => break,
                },
            };

            order.push(next.to_string());

            let idx = self.nodes[next];
            for dependent in self.graph.neighbors_directed(idx, Direction::Incoming) {
                let name = self.graph[dependent].as_str();
                if let Some(deps) = pending.get_mut(name) {
                    *deps -= 1;
                    if *deps == 0 {
                        pending.remove(name);
                        ready.insert(name);
                    }
                }
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, depends: &[&str]) -> PackageRecord {
        let mut record = PackageRecord::new(name, "1.0", "0");
        record.depends = depends.iter().map(|d| d.to_string()).collect();
        record
    }

    #[test]
    fn test_topological_order_dependencies_first() {
        let records = vec![
            record("numpy", &["python >=3.8", "libblas"]),
            record("python", &["zlib", "openssl"]),
            record("zlib", &[]),
            record("openssl", &["ca-certificates"]),
            record("ca-certificates", &[]),
            record("libblas", &[]),
        ];
        let order = DependencyGraph::new(&records).topological_order();
        assert_eq!(
            order,
            vec!["ca-certificates", "libblas", "openssl", "zlib", "python", "numpy"]
        );
    }

    #[test]
    fn test_topological_order_ties_by_name() {
        let records = vec![record("c", &[]), record("a", &[]), record("b", &[])];
        assert_eq!(
            DependencyGraph::new(&records).topological_order(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_topological_order_breaks_cycles_deterministically() {
        let records = vec![
            record("b", &["a"]),
            record("a", &["b"]),
            record("c", &["a"]),
        ];
        let order = DependencyGraph::new(&records).topological_order();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_and_external_dependencies_are_harmless() {
        let records = vec![
            record("app", &["lib >=1", "lib <2", "not-installed", "app"]),
            record("lib", &[]),
        ];
        let graph = DependencyGraph::new(&records);
        assert!(!graph.contains("not-installed"));
        assert_eq!(graph.topological_order(), vec!["lib", "app"]);
    }

    #[test]
    fn test_dependents_closure_follows_reverse_edges() {
        let records = vec![
            record("a", &["b"]),
            record("b", &["c"]),
            record("c", &[]),
            record("d", &[]),
        ];
        let graph = DependencyGraph::new(&records);
        let closure = graph.dependents_closure(&["c", "missing"]);
        assert_eq!(
            closure.into_iter().collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }
}
