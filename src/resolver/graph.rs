use super::locator::ModuleOrigin;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// One resolved source module
#[derive(Debug, Clone, Serialize)]
pub struct ModuleNode {
    pub name: String,
    pub path: PathBuf,
    pub digest: String,
    #[serde(skip)]
    pub source: Vec<u8>,
    pub is_package: bool,
    pub origin: ModuleOrigin,
    /// Directly imported modules that resolved to nodes
    pub imports: BTreeSet<String>,
    /// Imported names dropped because they are excluded or built in
    pub excluded_imports: BTreeSet<String>,
    pub discovery_index: usize,
}

/// Reachable modules in discovery order. Node indices are discovery indices.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<ModuleNode, ()>,
    index: HashMap<String, NodeIndex>,
    entry: String,
}

impl DependencyGraph {
    /// Build the graph from nodes listed in discovery order. Every import
    /// must name one of the nodes.
    pub(crate) fn from_nodes(entry: String, nodes: Vec<ModuleNode>) -> Result<Self, String> {
        let mut graph = DiGraph::with_capacity(nodes.len(), 0);
        let mut index = HashMap::with_capacity(nodes.len());

        for node in nodes {
            let name = node.name.clone();
            let idx = graph.add_node(node);
            if idx.index() != graph[idx].discovery_index {
                return Err(format!("module {name} is out of discovery order"));
            }
            index.insert(name, idx);
        }

        if !index.contains_key(&entry) {
            return Err(format!("entry module {entry} is missing from the graph"));
        }

        let mut edges = Vec::new();
        for from in graph.node_indices() {
            for import in &graph[from].imports {
                let to = index.get(import).ok_or_else(|| {
                    format!("module {} imports unknown node {import}", graph[from].name)
                })?;
                edges.push((from, *to));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        let graph = Self {
            graph,
            index,
            entry,
        };
        let reached = graph.reachable_from_entry();
        if let Some(orphan) = graph.modules().find(|n| !reached.contains(&n.name)) {
            return Err(format!(
                "module {} is not reachable from {}",
                orphan.name, graph.entry
            ));
        }
        Ok(graph)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn entry_node(&self) -> &ModuleNode {
        &self.graph[self.index[&self.entry]]
    }

    pub fn get(&self, name: &str) -> Option<&ModuleNode> {
        self.index.get(name).map(|idx| &self.graph[*idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Modules in discovery order, entry first
    pub fn modules(&self) -> impl Iterator<Item = &ModuleNode> {
        self.graph.node_weights()
    }

    /// Names of modules that import `name`
    pub fn importers_of(&self, name: &str) -> Vec<&str> {
        let Some(idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut importers: Vec<&ModuleNode> = self
            .graph
            .neighbors_directed(*idx, petgraph::Direction::Incoming)
            .map(|i| &self.graph[i])
            .collect();
        importers.sort_by_key(|n| n.discovery_index);
        importers.dedup_by_key(|n| n.discovery_index);
        importers.into_iter().map(|n| n.name.as_str()).collect()
    }

    /// Names reachable from the entry, for checking closure
    fn reachable_from_entry(&self) -> BTreeSet<String> {
        let start = self.index[&self.entry];
        let mut bfs = Bfs::new(&self.graph, start);
        let mut reached = BTreeSet::new();
        while let Some(idx) = bfs.next(&self.graph) {
            reached.insert(self.graph[idx].name.clone());
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, index: usize, imports: &[&str]) -> ModuleNode {
        ModuleNode {
            name: name.to_string(),
            path: PathBuf::from(format!("/src/{name}.py")),
            digest: String::new(),
            source: Vec::new(),
            is_package: false,
            origin: ModuleOrigin::Local,
            imports: imports.iter().map(|s| s.to_string()).collect(),
            excluded_imports: BTreeSet::new(),
            discovery_index: index,
        }
    }

    #[test]
    fn test_cycle_is_allowed() {
        let graph = DependencyGraph::from_nodes(
            "main".to_string(),
            vec![node("main", 0, &["a"]), node("a", 1, &["b"]), node("b", 2, &["a"])],
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.importers_of("a"), vec!["main", "b"]);
        assert_eq!(graph.reachable_from_entry().len(), 3);
        assert_eq!(graph.entry_node().name, "main");
    }

    #[test]
    fn test_dangling_edge_is_rejected() {
        let result =
            DependencyGraph::from_nodes("main".to_string(), vec![node("main", 0, &["ghost"])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_order_nodes_are_rejected() {
        let result = DependencyGraph::from_nodes(
            "main".to_string(),
            vec![node("main", 1, &[]), node("a", 0, &[])],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unreachable_node_is_rejected() {
        let result = DependencyGraph::from_nodes(
            "main".to_string(),
            vec![node("main", 0, &[]), node("orphan", 1, &[])],
        );
        assert!(result.unwrap_err().contains("orphan"));
    }
}
