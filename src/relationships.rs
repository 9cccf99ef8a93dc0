// src/relationships.rs

use anyhow::{Context, Result};
use log::{debug, info};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::config;
use crate::db::{self, PgPool};
use crate::models::{Document, DocumentId, Entity, EntityId, RelationshipEdge};

/// Accumulated co-occurrence for one unordered entity pair.
#[derive(Debug, Clone, Default)]
pub struct CoMention {
    pub strength: u32,
    pub document_ids: Vec<DocumentId>,
}

/// Scans the corpus and accumulates pairwise co-mention counts.
///
/// An entity is mentioned in a document when its canonical name appears as
/// a case-insensitive substring of the text. Substring matching makes this
/// pass O(documents x entities), which is why the result set is capped
/// downstream instead of maintained incrementally.
pub fn accumulate_co_mentions(
    documents: &[Document],
    entities: &[Entity],
) -> HashMap<(EntityId, EntityId), CoMention> {
    let lowered: Vec<(EntityId, String)> = entities
        .iter()
        .map(|e| (e.id, e.name.to_lowercase()))
        .collect();

    let mut pairs: HashMap<(EntityId, EntityId), CoMention> = HashMap::new();

    for document in documents {
        let content = document.content.to_lowercase();
        let mut mentioned: Vec<EntityId> = lowered
            .iter()
            .filter(|(_, name)| !name.is_empty() && content.contains(name.as_str()))
            .map(|(id, _)| *id)
            .collect();
        mentioned.sort();

        for i in 0..mentioned.len() {
            for j in (i + 1)..mentioned.len() {
                // mentioned is sorted, so (i, j) is already source < target.
                let entry = pairs.entry((mentioned[i], mentioned[j])).or_default();
                entry.strength += 1;
                entry.document_ids.push(document.id);
            }
        }
    }

    pairs
}

/// Keeps the strongest co-mention pairs: strength floor first, then sorted
/// descending and truncated to the configured cap.
pub fn select_top_edges(
    pairs: HashMap<(EntityId, EntityId), CoMention>,
) -> Vec<RelationshipEdge> {
    let total = pairs.len();
    let mut ranked: Vec<((EntityId, EntityId), CoMention)> = pairs
        .into_iter()
        .filter(|(_, edge)| edge.strength >= config::MIN_CO_MENTION_STRENGTH)
        .collect();
    let below_floor = total - ranked.len();

    ranked.sort_by(|a, b| b.1.strength.cmp(&a.1.strength).then(a.0.cmp(&b.0)));

    let capped = ranked.len().saturating_sub(config::MAX_CO_MENTION_EDGES);
    ranked.truncate(config::MAX_CO_MENTION_EDGES);

    if below_floor > 0 || capped > 0 {
        info!(
            "Co-mention selection: {} pairs below strength {}, {} dropped by the {}-edge cap.",
            below_floor,
            config::MIN_CO_MENTION_STRENGTH,
            capped,
            config::MAX_CO_MENTION_EDGES
        );
    }

    ranked
        .into_iter()
        .map(|((source_id, target_id), edge)| RelationshipEdge {
            source_id,
            target_id,
            rel_type: config::CO_MENTION_TYPE.to_string(),
            strength: edge.strength as i32,
            confidence: None,
        })
        .collect()
}

/// In-memory view of the persisted co-mention graph, consumed by risk
/// scoring for anchor adjacency lookups.
pub struct RelationshipGraph {
    graph: UnGraph<EntityId, u32>,
    nodes: HashMap<EntityId, NodeIndex>,
}

impl RelationshipGraph {
    pub fn from_edges(edges: &[RelationshipEdge]) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut nodes: HashMap<EntityId, NodeIndex> = HashMap::new();

        for edge in edges {
            let a = *nodes
                .entry(edge.source_id)
                .or_insert_with(|| graph.add_node(edge.source_id));
            let b = *nodes
                .entry(edge.target_id)
                .or_insert_with(|| graph.add_node(edge.target_id));
            graph.add_edge(a, b, edge.strength.max(0) as u32);
        }

        Self { graph, nodes }
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Count and summed strength of the entity's direct edges into the
    /// anchor set. An entity absent from the graph has no edges.
    pub fn anchor_proximity(
        &self,
        entity: EntityId,
        anchors: &HashSet<EntityId>,
    ) -> (u32, i64) {
        let Some(&idx) = self.nodes.get(&entity) else {
            return (0, 0);
        };
        let mut count = 0u32;
        let mut strength = 0i64;
        for edge in self.graph.edges(idx) {
            let neighbor = if edge.source() == idx {
                edge.target()
            } else {
                edge.source()
            };
            if anchors.contains(&self.graph[neighbor]) {
                count += 1;
                strength += i64::from(*edge.weight());
            }
        }
        (count, strength)
    }
}

/// Recomputes the co-mention graph from scratch over the deduplicated
/// entity set, persists the strongest edges, and returns the graph for the
/// risk pass. All writes happen in one transaction; in dry-run mode it is
/// rolled back.
pub async fn rebuild(pool: &PgPool, dry_run: bool) -> Result<(usize, RelationshipGraph)> {
    info!("Rebuilding co-mention relationship graph from corpus...");
    let start_time = Instant::now();

    let read_conn = pool
        .get()
        .await
        .context("Failed to get DB connection for relationship rebuild reads")?;
    let entities = db::fetch_person_entities(&*read_conn).await?;
    let documents = db::fetch_documents(&*read_conn).await?;
    drop(read_conn);
    info!(
        "Scanning {} documents against {} entities for co-mentions.",
        documents.len(),
        entities.len()
    );

    let pairs = accumulate_co_mentions(&documents, &entities);
    debug!("Accumulated {} raw co-mention pairs.", pairs.len());
    let edges = select_top_edges(pairs);
    let graph = RelationshipGraph::from_edges(&edges);

    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for relationship writes")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start relationship rebuild transaction")?;

    db::clear_co_mention_edges(&tx, config::CO_MENTION_TYPE).await?;
    for edge in &edges {
        db::upsert_relationship(&tx, edge).await?;
    }

    if dry_run {
        tx.rollback()
            .await
            .context("Failed to roll back dry-run relationship transaction")?;
        info!(
            "[dry run] Would persist {} co-mention edges (computed in {:.2?}).",
            edges.len(),
            start_time.elapsed()
        );
    } else {
        tx.commit()
            .await
            .context("Failed to commit relationship rebuild transaction")?;
        info!(
            "Relationship rebuild finished in {:.2?}: {} co-mention edges persisted.",
            start_time.elapsed(),
            edges.len()
        );
    }

    Ok((edges.len(), graph))
}

/// Loads the persisted co-mention edges into a graph without rebuilding,
/// for runs that skip the corpus scan.
pub async fn load_graph(pool: &PgPool) -> Result<RelationshipGraph> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for relationship load")?;
    let rows = conn
        .query(
            "SELECT source_id, target_id, rel_type, strength, confidence
             FROM public.relationship WHERE rel_type = $1",
            &[&config::CO_MENTION_TYPE],
        )
        .await
        .context("Failed to load persisted co-mention edges")?;

    let edges: Vec<RelationshipEdge> = rows
        .iter()
        .map(|row| RelationshipEdge {
            source_id: row.get(0),
            target_id: row.get(1),
            rel_type: row.get(2),
            strength: row.get(3),
            confidence: row.get(4),
        })
        .collect();
    info!("Loaded {} persisted co-mention edges.", edges.len());
    Ok(RelationshipGraph::from_edges(&edges))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: i64, name: &str) -> Entity {
        Entity {
            id: EntityId(id),
            name: name.to_string(),
            mention_count: 0,
            is_vip: false,
            risk_rating: 1,
        }
    }

    fn document(id: i64, content: &str) -> Document {
        Document {
            id: DocumentId(id),
            content: content.to_string(),
        }
    }

    #[test]
    fn accumulates_pairwise_counts_case_insensitively() {
        let entities = vec![entity(1, "Alice Harper"), entity(2, "Bob Quill")];
        let documents = vec![
            document(10, "ALICE HARPER met bob quill on Tuesday."),
            document(11, "alice harper and Bob Quill again."),
            document(12, "Only Alice Harper here."),
        ];

        let pairs = accumulate_co_mentions(&documents, &entities);
        let edge = pairs.get(&(EntityId(1), EntityId(2))).unwrap();
        assert_eq!(edge.strength, 2);
        assert_eq!(edge.document_ids, vec![DocumentId(10), DocumentId(11)]);
    }

    #[test]
    fn pair_keys_are_ordered_low_to_high() {
        // Same pair regardless of which entity id is larger.
        let entities = vec![entity(9, "Alice Harper"), entity(2, "Bob Quill")];
        let documents = vec![document(1, "alice harper, bob quill")];

        let pairs = accumulate_co_mentions(&documents, &entities);
        assert!(pairs.contains_key(&(EntityId(2), EntityId(9))));
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn select_drops_pairs_below_strength_floor() {
        let entities = vec![
            entity(1, "Alice Harper"),
            entity(2, "Bob Quill"),
            entity(3, "Cara Voss"),
        ];
        // Alice/Bob co-occur twice, Alice/Cara once.
        let documents = vec![
            document(1, "alice harper bob quill"),
            document(2, "alice harper bob quill"),
            document(3, "alice harper cara voss"),
        ];

        let edges = select_top_edges(accumulate_co_mentions(&documents, &entities));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_id, EntityId(1));
        assert_eq!(edges[0].target_id, EntityId(2));
        assert_eq!(edges[0].strength, 2);
        assert_eq!(edges[0].rel_type, "co_mention");
    }

    #[test]
    fn select_orders_by_descending_strength() {
        let mut pairs = HashMap::new();
        pairs.insert(
            (EntityId(1), EntityId(2)),
            CoMention {
                strength: 3,
                document_ids: vec![],
            },
        );
        pairs.insert(
            (EntityId(1), EntityId(3)),
            CoMention {
                strength: 8,
                document_ids: vec![],
            },
        );
        let edges = select_top_edges(pairs);
        assert_eq!(edges[0].strength, 8);
        assert_eq!(edges[1].strength, 3);
    }

    #[test]
    fn anchor_proximity_sums_direct_edges_only() {
        let edges = vec![
            RelationshipEdge {
                source_id: EntityId(1),
                target_id: EntityId(100),
                rel_type: "co_mention".to_string(),
                strength: 25,
                confidence: None,
            },
            RelationshipEdge {
                source_id: EntityId(1),
                target_id: EntityId(101),
                rel_type: "co_mention".to_string(),
                strength: 15,
                confidence: None,
            },
            // Non-anchor neighbor, must not contribute.
            RelationshipEdge {
                source_id: EntityId(1),
                target_id: EntityId(5),
                rel_type: "co_mention".to_string(),
                strength: 99,
                confidence: None,
            },
            // Anchor edge not touching entity 1.
            RelationshipEdge {
                source_id: EntityId(5),
                target_id: EntityId(100),
                rel_type: "co_mention".to_string(),
                strength: 7,
                confidence: None,
            },
        ];
        let graph = RelationshipGraph::from_edges(&edges);
        let anchors: HashSet<EntityId> = [EntityId(100), EntityId(101)].into_iter().collect();

        assert_eq!(graph.anchor_proximity(EntityId(1), &anchors), (2, 40));
        assert_eq!(graph.anchor_proximity(EntityId(5), &anchors), (1, 7));
        assert_eq!(graph.anchor_proximity(EntityId(42), &anchors), (0, 0));
    }
}
