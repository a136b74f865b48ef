//! In-memory graph store
//!
//! BFS-based implementation of the graph contract for tests and the
//! graph-less deployment variant. Edges are matched by name across
//! labels, mirroring the production store's merge semantics.

use super::{GraphPath, GraphStats, GraphStore, NeighborNode, MAX_NEIGHBOR_DEPTH};
use crate::errors::Result;
use crate::types::{GraphNode, NodeType, RelationType};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
struct Edge {
    from: String,
    to: String,
    relation: RelationType,
    description: Option<String>,
}

#[derive(Default)]
struct Inner {
    /// Keyed by (label, name); unique within label
    nodes: HashMap<(NodeType, String), BTreeMap<String, String>>,
    edges: Vec<Edge>,
}

impl Inner {
    /// Undirected adjacency by name, with the edge type toward each neighbor
    fn adjacency(&self) -> HashMap<&str, Vec<(&str, RelationType)>> {
        let mut adjacency: HashMap<&str, Vec<(&str, RelationType)>> = HashMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push((edge.to.as_str(), edge.relation));
            adjacency
                .entry(edge.to.as_str())
                .or_default()
                .push((edge.from.as_str(), edge.relation));
        }
        adjacency
    }

    fn has_node(&self, name: &str) -> bool {
        self.nodes.keys().any(|(_, n)| n == name)
    }

    fn label_of(&self, name: &str) -> Option<NodeType> {
        self.nodes
            .keys()
            .find(|(_, n)| n == name)
            .map(|(label, _)| *label)
    }
}

#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ensure_constraints(&self) -> Result<()> {
        Ok(())
    }

    async fn merge_node(
        &self,
        node_type: NodeType,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock");
        let entry = inner
            .nodes
            .entry((node_type, name.to_string()))
            .or_default();
        for (key, value) in properties {
            entry.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn merge_edge(
        &self,
        from: &str,
        to: &str,
        relation: RelationType,
        description: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock");
        if !inner.has_node(from) || !inner.has_node(to) {
            // MATCH semantics: both endpoints must already exist
            return Ok(());
        }
        match inner
            .edges
            .iter_mut()
            .find(|e| e.from == from && e.to == to && e.relation == relation)
        {
            Some(edge) => {
                if description.is_some() {
                    edge.description = description.map(String::from);
                }
            }
            None => inner.edges.push(Edge {
                from: from.to_string(),
                to: to.to_string(),
                relation,
                description: description.map(String::from),
            }),
        }
        Ok(())
    }

    async fn neighbors(&self, name: &str, depth: u32) -> Result<Vec<NeighborNode>> {
        let depth = depth.clamp(1, MAX_NEIGHBOR_DEPTH);
        let inner = self.inner.read().expect("graph lock");
        if !inner.has_node(name) {
            return Ok(Vec::new());
        }

        let adjacency = inner.adjacency();
        let mut distances: HashMap<&str, u32> = HashMap::new();
        let mut queue = VecDeque::from([(name, 0u32)]);
        distances.insert(name, 0);

        while let Some((current, dist)) = queue.pop_front() {
            if dist >= depth {
                continue;
            }
            for &(neighbor, _) in adjacency.get(current).into_iter().flatten() {
                if !distances.contains_key(neighbor) {
                    distances.insert(neighbor, dist + 1);
                    queue.push_back((neighbor, dist + 1));
                }
            }
        }

        let mut neighbors: Vec<NeighborNode> = distances
            .into_iter()
            .filter(|(n, _)| *n != name)
            .map(|(n, distance)| NeighborNode {
                name: n.to_string(),
                label: inner
                    .label_of(n)
                    .map(|l| l.as_str().to_string())
                    .unwrap_or_default(),
                distance,
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.name.cmp(&b.name)));
        Ok(neighbors)
    }

    async fn shortest_path(&self, from: &str, to: &str) -> Result<Option<GraphPath>> {
        let inner = self.inner.read().expect("graph lock");
        if !inner.has_node(from) || !inner.has_node(to) {
            return Ok(None);
        }
        if from == to {
            return Ok(Some(GraphPath {
                nodes: vec![from.to_string()],
                relations: Vec::new(),
            }));
        }

        let adjacency = inner.adjacency();
        let mut predecessor: HashMap<&str, (&str, RelationType)> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        'bfs: while let Some(current) = queue.pop_front() {
            for &(neighbor, relation) in adjacency.get(current).into_iter().flatten() {
                if visited.insert(neighbor) {
                    predecessor.insert(neighbor, (current, relation));
                    if neighbor == to {
                        break 'bfs;
                    }
                    queue.push_back(neighbor);
                }
            }
        }

        if !predecessor.contains_key(to) {
            return Ok(None);
        }

        // Walk predecessors back to the start
        let mut nodes = vec![to.to_string()];
        let mut relations = Vec::new();
        let mut cursor = to;
        while let Some(&(prev, relation)) = predecessor.get(cursor) {
            relations.push(relation.as_str().to_string());
            nodes.push(prev.to_string());
            cursor = prev;
        }
        nodes.reverse();
        relations.reverse();

        Ok(Some(GraphPath { nodes, relations }))
    }

    async fn documents_for(&self, name: &str, limit: usize) -> Result<Vec<String>> {
        let reachable = self.neighbors(name, 2).await?;
        let inner = self.inner.read().expect("graph lock");
        Ok(reachable
            .into_iter()
            .filter(|n| inner.label_of(&n.name) == Some(NodeType::Document))
            .map(|n| n.name)
            .take(limit)
            .collect())
    }

    async fn nodes_of_type(&self, node_type: NodeType, limit: usize) -> Result<Vec<GraphNode>> {
        let inner = self.inner.read().expect("graph lock");
        let mut nodes: Vec<GraphNode> = inner
            .nodes
            .iter()
            .filter(|((label, _), _)| *label == node_type)
            .map(|((_, name), properties)| GraphNode {
                name: name.clone(),
                node_type,
                properties: properties.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes.truncate(limit);
        Ok(nodes)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let inner = self.inner.read().expect("graph lock");
        let mut by_label: BTreeMap<String, u64> = BTreeMap::new();
        for (label, _) in inner.nodes.keys() {
            *by_label.entry(label.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(GraphStats {
            total_nodes: inner.nodes.len() as u64,
            total_edges: inner.edges.len() as u64,
            by_label,
        })
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock");
        inner.nodes.clear();
        inner.edges.clear();
        Ok(())
    }
}
