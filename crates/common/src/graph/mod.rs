//! Graph store adapter
//!
//! Typed nodes and directed edges extracted from the knowledge corpus.
//! Backends:
//! - `Neo4jGraphStore`: Bolt driver with MERGE semantics and per-label
//!   uniqueness constraints on `name`
//! - `MemoryGraphStore`: BFS-based in-process store for tests and the
//!   graph-less deployment variant

mod memory;

pub use memory::MemoryGraphStore;

use crate::config::GraphStoreConfig;
use crate::errors::{AppError, Result};
use crate::types::{GraphNode, NodeType, RelationType};
use async_trait::async_trait;
use neo4rs::{query, Graph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum traversal depth accepted by `neighbors`
pub const MAX_NEIGHBOR_DEPTH: u32 = 3;

/// A node reached during traversal, ordered by path length
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeighborNode {
    pub name: String,
    pub label: String,
    pub distance: u32,
}

/// A shortest path: node names with the interleaved edge-type sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphPath {
    pub nodes: Vec<String>,
    pub relations: Vec<String>,
}

/// Graph statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    #[serde(rename = "totalNodes")]
    pub total_nodes: u64,
    #[serde(rename = "totalEdges")]
    pub total_edges: u64,
    #[serde(rename = "byLabel")]
    pub by_label: BTreeMap<String, u64>,
}

/// Trait over the knowledge graph
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Declare per-label uniqueness constraints on `name`
    async fn ensure_constraints(&self) -> Result<()>;

    /// Idempotent node upsert
    async fn merge_node(
        &self,
        node_type: NodeType,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Idempotent edge upsert, matching endpoints by name across any label
    async fn merge_edge(
        &self,
        from: &str,
        to: &str,
        relation: RelationType,
        description: Option<&str>,
    ) -> Result<()>;

    /// Distinct nodes reachable within `depth` edges, ordered by path length
    async fn neighbors(&self, name: &str, depth: u32) -> Result<Vec<NeighborNode>>;

    /// Shortest path between two nodes; `shortest_path(a, a)` is zero edges
    async fn shortest_path(&self, from: &str, to: &str) -> Result<Option<GraphPath>>;

    /// Distinct Document nodes within two hops of a node
    async fn documents_for(&self, name: &str, limit: usize) -> Result<Vec<String>>;

    /// Nodes of one label
    async fn nodes_of_type(&self, node_type: NodeType, limit: usize) -> Result<Vec<GraphNode>>;

    /// Totals and per-label distribution
    async fn stats(&self) -> Result<GraphStats>;

    /// Remove every node and edge
    async fn reset(&self) -> Result<()>;
}

/// Strip property keys down to identifier-safe characters
fn safe_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Neo4j-backed graph store
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Connect over Bolt
    pub async fn connect(config: &GraphStoreConfig) -> Result<Self> {
        let uri = config.uri.clone().ok_or_else(|| AppError::ConfigMissing {
            key: "graph_store.uri".to_string(),
        })?;
        let user = config.user.clone().unwrap_or_default();
        let password = config.password.clone().unwrap_or_default();

        let graph = Graph::new(&uri, &user, &password).await?;
        Ok(Self { graph })
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn ensure_constraints(&self) -> Result<()> {
        for node_type in NodeType::ALL {
            let stmt = format!(
                "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{label}) REQUIRE n.name IS UNIQUE",
                label = node_type.as_str()
            );
            self.graph.run(query(&stmt)).await?;
        }
        Ok(())
    }

    async fn merge_node(
        &self,
        node_type: NodeType,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut stmt = format!(
            "MERGE (n:{label} {{name: $name}})",
            label = node_type.as_str()
        );
        let keys: Vec<String> = properties.keys().map(|k| safe_key(k)).collect();
        for key in keys.iter().filter(|k| !k.is_empty()) {
            stmt.push_str(&format!(" SET n.{key} = $prop_{key}"));
        }

        let mut q = query(&stmt).param("name", name);
        for (key, value) in properties {
            let key = safe_key(key);
            if !key.is_empty() {
                q = q.param(&format!("prop_{key}"), value.as_str());
            }
        }

        self.graph.run(q).await?;
        Ok(())
    }

    async fn merge_edge(
        &self,
        from: &str,
        to: &str,
        relation: RelationType,
        description: Option<&str>,
    ) -> Result<()> {
        let stmt = format!(
            "MATCH (a {{name: $from}}) MATCH (b {{name: $to}}) \
             MERGE (a)-[r:{rel}]->(b) \
             SET r.description = coalesce($description, r.description)",
            rel = relation.as_str()
        );
        self.graph
            .run(
                query(&stmt)
                    .param("from", from)
                    .param("to", to)
                    .param("description", description.unwrap_or_default()),
            )
            .await?;
        Ok(())
    }

    async fn neighbors(&self, name: &str, depth: u32) -> Result<Vec<NeighborNode>> {
        let depth = depth.clamp(1, MAX_NEIGHBOR_DEPTH);
        let stmt = format!(
            "MATCH (start {{name: $name}}) \
             MATCH path = (start)-[*1..{depth}]-(n) \
             WHERE n.name <> $name \
             WITH n, min(length(path)) AS distance \
             RETURN n.name AS name, labels(n)[0] AS label, distance \
             ORDER BY distance ASC, name ASC"
        );

        let mut rows = self.graph.execute(query(&stmt).param("name", name)).await?;
        let mut neighbors = Vec::new();
        while let Some(row) = rows.next().await? {
            neighbors.push(NeighborNode {
                name: row.get("name")?,
                label: row.get("label")?,
                distance: row.get::<i64>("distance")? as u32,
            });
        }
        Ok(neighbors)
    }

    async fn shortest_path(&self, from: &str, to: &str) -> Result<Option<GraphPath>> {
        // shortestPath with a zero-length lower bound is inconsistent
        // across server versions; the same-node path is built here instead
        if from == to {
            let mut rows = self
                .graph
                .execute(
                    query("MATCH (n {name: $name}) RETURN n.name AS name LIMIT 1")
                        .param("name", from),
                )
                .await?;
            return match rows.next().await? {
                Some(_) => Ok(Some(GraphPath {
                    nodes: vec![from.to_string()],
                    relations: Vec::new(),
                })),
                None => Ok(None),
            };
        }

        let stmt = "MATCH (a {name: $from}) MATCH (b {name: $to}) \
                    MATCH p = shortestPath((a)-[*1..6]-(b)) \
                    RETURN [x IN nodes(p) | x.name] AS names, \
                           [r IN relationships(p) | type(r)] AS rels";

        let mut rows = self
            .graph
            .execute(query(stmt).param("from", from).param("to", to))
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(GraphPath {
                nodes: row.get("names")?,
                relations: row.get("rels")?,
            })),
            None => Ok(None),
        }
    }

    async fn documents_for(&self, name: &str, limit: usize) -> Result<Vec<String>> {
        let stmt = "MATCH (e {name: $name})-[*1..2]-(d:Document) \
                    RETURN DISTINCT d.name AS name LIMIT $limit";

        let mut rows = self
            .graph
            .execute(query(stmt).param("name", name).param("limit", limit as i64))
            .await?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            documents.push(row.get("name")?);
        }
        Ok(documents)
    }

    async fn nodes_of_type(&self, node_type: NodeType, limit: usize) -> Result<Vec<GraphNode>> {
        let stmt = format!(
            "MATCH (n:{label}) \
             RETURN n.name AS name, coalesce(n.description, '') AS description \
             ORDER BY name LIMIT $limit",
            label = node_type.as_str()
        );

        let mut rows = self
            .graph
            .execute(query(&stmt).param("limit", limit as i64))
            .await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut properties = BTreeMap::new();
            let description: String = row.get("description")?;
            if !description.is_empty() {
                properties.insert("description".to_string(), description);
            }
            nodes.push(GraphNode {
                name: row.get("name")?,
                node_type,
                properties,
            });
        }
        Ok(nodes)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let mut rows = self
            .graph
            .execute(query("MATCH (n) RETURN count(n) AS total"))
            .await?;
        let total_nodes = match rows.next().await? {
            Some(row) => row.get::<i64>("total")? as u64,
            None => 0,
        };

        let mut rows = self
            .graph
            .execute(query("MATCH ()-[r]->() RETURN count(r) AS total"))
            .await?;
        let total_edges = match rows.next().await? {
            Some(row) => row.get::<i64>("total")? as u64,
            None => 0,
        };

        let mut by_label = BTreeMap::new();
        for node_type in NodeType::ALL {
            let stmt = format!(
                "MATCH (n:{label}) RETURN count(n) AS total",
                label = node_type.as_str()
            );
            let mut rows = self.graph.execute(query(&stmt)).await?;
            if let Some(row) = rows.next().await? {
                let count = row.get::<i64>("total")? as u64;
                if count > 0 {
                    by_label.insert(node_type.as_str().to_string(), count);
                }
            }
        }

        Ok(GraphStats {
            total_nodes,
            total_edges,
            by_label,
        })
    }

    async fn reset(&self) -> Result<()> {
        self.graph.run(query("MATCH (n) DETACH DELETE n")).await?;
        Ok(())
    }
}

/// Create a graph store based on configuration
///
/// Returns None when the graph store is disabled (the simpler deployment
/// variant); falls back to the in-memory store when enabled without a URI.
pub async fn create_graph_store(
    config: &GraphStoreConfig,
) -> Result<Option<std::sync::Arc<dyn GraphStore>>> {
    if !config.enabled {
        return Ok(None);
    }
    match &config.uri {
        Some(_) => {
            let store = Neo4jGraphStore::connect(config).await?;
            Ok(Some(std::sync::Arc::new(store)))
        }
        None => {
            tracing::warn!("No graph store URI configured, using in-memory store");
            Ok(Some(std::sync::Arc::new(MemoryGraphStore::new())))
        }
    }
}
