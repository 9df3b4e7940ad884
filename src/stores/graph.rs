//! Neo4j-backed property graph store.
//!
//! All writes are idempotent `MERGE`s, so concurrently dispatched triplet
//! tasks can land in any order. Entity lookup unions full-text name matching
//! with exact-identifier matching before expanding to neighbors; a second hop
//! is taken only when a [`SecondHopPolicy`] is configured, bounding traversal
//! fan-out.

use async_trait::async_trait;
use neo4rs::{Graph, Query, query};
use serde_json::Value;

use super::{GraphBackend, GraphCounts, GraphFact, GraphSnapshot, SnapshotEdge, SnapshotNode, Triplet};
use crate::types::RagError;

/// Relationship type used when sanitization empties a predicate.
pub const FALLBACK_RELATIONSHIP: &str = "RELATES_TO";

/// Label applied to every merged entity node.
const ENTITY_LABEL: &str = "Entity";

/// Strips a relationship type down to `[A-Za-z0-9_]+`, falling back to
/// [`FALLBACK_RELATIONSHIP`] when nothing survives.
pub fn sanitize_relationship(rel_type: &str) -> String {
    let sanitized: String = rel_type
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if sanitized.is_empty() {
        FALLBACK_RELATIONSHIP.to_string()
    } else {
        sanitized
    }
}

/// Same character policy for node labels, falling back to `Entity`.
pub fn sanitize_label(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if sanitized.is_empty() {
        ENTITY_LABEL.to_string()
    } else {
        sanitized
    }
}

/// Opt-in second traversal hop: from nodes of `from_label`, follow only the
/// listed relationship types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondHopPolicy {
    pub from_label: String,
    pub relationship_types: Vec<String>,
}

impl SecondHopPolicy {
    /// Parses the `Label:REL_A|REL_B` environment form.
    pub fn parse(raw: &str) -> Option<Self> {
        let (label, rels) = raw.split_once(':')?;
        let from_label = sanitize_label(label.trim());
        let relationship_types: Vec<String> = rels
            .split('|')
            .map(|rel| rel.trim())
            .filter(|rel| !rel.is_empty())
            .map(sanitize_relationship)
            .collect();
        if relationship_types.is_empty() {
            return None;
        }
        Some(Self {
            from_label,
            relationship_types,
        })
    }
}

/// Tuning for [`Neo4jGraphStore::neighborhood`].
#[derive(Clone, Debug)]
pub struct GraphSearchConfig {
    /// Full-text index over entity names.
    pub fulltext_index: String,
    /// Minimum full-text score for a name match.
    pub fulltext_threshold: f64,
    /// Node properties checked for exact-identifier matches.
    pub identifier_properties: Vec<String>,
    /// Row cap per traversed entity.
    pub per_entity_limit: usize,
    pub second_hop: Option<SecondHopPolicy>,
}

impl Default for GraphSearchConfig {
    fn default() -> Self {
        Self {
            fulltext_index: "entity_names".to_string(),
            fulltext_threshold: 0.8,
            identifier_properties: vec!["identifier".to_string()],
            per_entity_limit: 50,
            second_hop: None,
        }
    }
}

/// Builds the per-entity traversal query for `config`.
///
/// Kept as a pure function so the generated Cypher is testable without a
/// running database.
fn build_neighborhood_cypher(config: &GraphSearchConfig) -> String {
    let identifier_clause = config
        .identifier_properties
        .iter()
        .map(|property| format!("matched.{} = searchTerm", sanitize_label(property)))
        .collect::<Vec<_>>()
        .join(" OR ");

    let (second_hop_match, second_hop_return) = match &config.second_hop {
        Some(policy) => {
            let rels = policy
                .relationship_types
                .iter()
                .map(|rel| sanitize_relationship(rel))
                .collect::<Vec<_>>()
                .join("|");
            (
                format!(
                    "OPTIONAL MATCH (neighbor)-[r2:{rels}]-(grandchild:{ENTITY_LABEL})\nWHERE neighbor:{}\n",
                    sanitize_label(&policy.from_label)
                ),
                "type(r2) AS p2, grandchild.name AS g, labels(grandchild) AS g_labels",
            )
        }
        None => (
            String::new(),
            "null AS p2, null AS g, null AS g_labels",
        ),
    };

    format!(
        "WITH $term AS searchTerm\n\
         CALL {{\n\
           WITH searchTerm\n\
           CALL db.index.fulltext.queryNodes('{index}', searchTerm)\n\
           YIELD node, score\n\
           WHERE score > $threshold\n\
           RETURN node AS matched\n\
           LIMIT 5\n\
           UNION\n\
           WITH searchTerm\n\
           MATCH (matched:{ENTITY_LABEL})\n\
           WHERE {identifier_clause}\n\
           RETURN matched\n\
           LIMIT 5\n\
         }}\n\
         WITH DISTINCT matched\n\
         MATCH (matched)-[r]-(neighbor:{ENTITY_LABEL})\n\
         {second_hop_match}\
         RETURN DISTINCT\n\
           matched.name AS s, type(r) AS p, neighbor.name AS o,\n\
           labels(matched) AS s_labels, labels(neighbor) AS o_labels,\n\
           {second_hop_return}\n\
         LIMIT {limit}",
        index = config.fulltext_index,
        limit = config.per_entity_limit,
    )
}

/// Picks the most specific label for display, skipping the shared `Entity`
/// marker label.
fn display_label(labels: &[String]) -> String {
    labels
        .iter()
        .find(|label| label.as_str() != ENTITY_LABEL)
        .cloned()
        .unwrap_or_else(|| ENTITY_LABEL.to_string())
}

pub struct Neo4jGraphStore {
    graph: Graph,
    config: GraphSearchConfig,
}

impl Neo4jGraphStore {
    /// Connects to the graph database over Bolt.
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        config: GraphSearchConfig,
    ) -> Result<Self, RagError> {
        let graph = Graph::new(uri, user, password).await?;
        Ok(Self { graph, config })
    }

    fn de(err: neo4rs::DeError) -> RagError {
        RagError::Graph(err.to_string())
    }
}

fn with_json_param(q: Query, name: &str, value: &Value) -> Query {
    match value {
        Value::String(text) => q.param(name, text.clone()),
        Value::Number(number) if number.is_i64() => {
            q.param(name, number.as_i64().unwrap_or_default())
        }
        Value::Number(number) => q.param(name, number.as_f64().unwrap_or_default()),
        Value::Bool(flag) => q.param(name, *flag),
        other => q.param(name, other.to_string()),
    }
}

#[async_trait]
impl GraphBackend for Neo4jGraphStore {
    async fn ensure_schema(&self) -> Result<(), RagError> {
        self.graph
            .run(query(&format!(
                "CREATE CONSTRAINT IF NOT EXISTS FOR (e:{ENTITY_LABEL}) REQUIRE e.name IS UNIQUE"
            )))
            .await?;
        self.graph
            .run(query(&format!(
                "CREATE FULLTEXT INDEX {} IF NOT EXISTS FOR (n:{ENTITY_LABEL}) ON EACH [n.name]",
                self.config.fulltext_index
            )))
            .await?;
        Ok(())
    }

    async fn merge_triplet(&self, triplet: &Triplet) -> Result<(), RagError> {
        let relationship = sanitize_relationship(&triplet.predicate);
        let cypher = format!(
            "MERGE (s:{ENTITY_LABEL} {{name: $s}}) \
             MERGE (o:{ENTITY_LABEL} {{name: $o}}) \
             MERGE (s)-[r:{relationship}]->(o)"
        );
        self.graph
            .run(
                query(&cypher)
                    .param("s", triplet.subject.clone())
                    .param("o", triplet.object.clone()),
            )
            .await?;
        Ok(())
    }

    async fn merge_node(
        &self,
        label: &str,
        id: &str,
        properties: &serde_json::Map<String, Value>,
    ) -> Result<(), RagError> {
        let label = sanitize_label(label);
        let mut cypher = format!("MERGE (n:{label} {{id: $id}})");
        let mut params: Vec<(String, &Value)> = Vec::with_capacity(properties.len());
        if !properties.is_empty() {
            let mut clauses = Vec::with_capacity(properties.len());
            for (index, (key, value)) in properties.iter().enumerate() {
                let safe_key = sanitize_label(key);
                clauses.push(format!("n.{safe_key} = $p{index}"));
                params.push((format!("p{index}"), value));
            }
            cypher.push_str(" SET ");
            cypher.push_str(&clauses.join(", "));
        }

        let mut q = query(&cypher).param("id", id.to_string());
        for (name, value) in params {
            q = with_json_param(q, &name, value);
        }
        self.graph.run(q).await?;
        Ok(())
    }

    async fn merge_edge(&self, from: &str, to: &str, rel_type: &str) -> Result<(), RagError> {
        let relationship = sanitize_relationship(rel_type);
        let cypher = format!(
            "MATCH (a {{id: $from}}) MATCH (b {{id: $to}}) MERGE (a)-[r:{relationship}]->(b)"
        );
        self.graph
            .run(
                query(&cypher)
                    .param("from", from.to_string())
                    .param("to", to.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn neighborhood(&self, entity: &str) -> Result<Vec<GraphFact>, RagError> {
        let cypher = build_neighborhood_cypher(&self.config);
        let mut stream = self
            .graph
            .execute(
                query(&cypher)
                    .param("term", entity.to_string())
                    .param("threshold", self.config.fulltext_threshold),
            )
            .await?;

        let mut facts = Vec::new();
        while let Some(row) = stream.next().await? {
            let subject: Option<String> = row.get("s").map_err(Self::de)?;
            let object: Option<String> = row.get("o").map_err(Self::de)?;
            let relationship: String = row.get("p").map_err(Self::de)?;
            let s_labels: Vec<String> = row.get("s_labels").map_err(Self::de)?;
            let o_labels: Vec<String> = row.get("o_labels").map_err(Self::de)?;

            let subject = subject.unwrap_or_else(|| "Unknown".to_string());
            let object = object.unwrap_or_else(|| "Unknown".to_string());
            let object_label = display_label(&o_labels);

            facts.push(GraphFact {
                subject,
                subject_label: display_label(&s_labels),
                relationship,
                object: object.clone(),
                object_label: object_label.clone(),
            });

            let second_rel: Option<String> = row.get("p2").map_err(Self::de)?;
            if let Some(second_rel) = second_rel {
                let grandchild: Option<String> = row.get("g").map_err(Self::de)?;
                let g_labels: Vec<String> = row.get("g_labels").unwrap_or_default();
                facts.push(GraphFact {
                    subject: object,
                    subject_label: object_label,
                    relationship: second_rel,
                    object: grandchild.unwrap_or_else(|| "Unknown".to_string()),
                    object_label: display_label(&g_labels),
                });
            }
        }
        Ok(facts)
    }

    async fn snapshot(&self, limit: usize) -> Result<GraphSnapshot, RagError> {
        let mut snapshot = GraphSnapshot::default();

        let mut nodes = self
            .graph
            .execute(query(&format!(
                "MATCH (n:{ENTITY_LABEL}) \
                 RETURN n.name AS id, n.name AS label, labels(n)[0] AS kind \
                 LIMIT {limit}"
            )))
            .await?;
        while let Some(row) = nodes.next().await? {
            snapshot.nodes.push(SnapshotNode {
                id: row.get("id").map_err(Self::de)?,
                label: row.get("label").map_err(Self::de)?,
                kind: row.get("kind").map_err(Self::de)?,
            });
        }

        let mut edges = self
            .graph
            .execute(query(&format!(
                "MATCH (s:{ENTITY_LABEL})-[r]->(o:{ENTITY_LABEL}) \
                 RETURN s.name AS source, type(r) AS label, o.name AS target \
                 LIMIT {limit}"
            )))
            .await?;
        while let Some(row) = edges.next().await? {
            snapshot.edges.push(SnapshotEdge {
                source: row.get("source").map_err(Self::de)?,
                label: row.get("label").map_err(Self::de)?,
                target: row.get("target").map_err(Self::de)?,
            });
        }

        Ok(snapshot)
    }

    async fn wipe(&self) -> Result<(), RagError> {
        self.graph.run(query("MATCH (n) DETACH DELETE n")).await?;
        Ok(())
    }

    async fn counts(&self) -> Result<GraphCounts, RagError> {
        let mut counts = GraphCounts::default();

        let mut nodes = self
            .graph
            .execute(query("MATCH (n) RETURN count(n) AS c"))
            .await?;
        if let Some(row) = nodes.next().await? {
            counts.nodes = row.get::<i64>("c").map_err(Self::de)? as usize;
        }

        let mut rels = self
            .graph
            .execute(query("MATCH ()-[r]->() RETURN count(r) AS c"))
            .await?;
        if let Some(row) = rels.next().await? {
            counts.relationships = row.get::<i64>("c").map_err(Self::de)? as usize;
        }

        Ok(counts)
    }

    async fn ping(&self) -> Result<(), RagError> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }
}
