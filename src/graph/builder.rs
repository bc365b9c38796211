// graph/builder.rs
// Graph builder - derives the relationship graph from the similarity matrix

use super::{GraphLink, GraphNode, RelationshipGraph};
use crate::pipeline::cluster::ClusterAssignment;
use crate::pipeline::ingest::DocumentStore;
use crate::pipeline::similarity::SimilarityMatrix;
use tracing::info;

pub struct GraphBuilder<'a> {
    store: &'a DocumentStore,
    assignment: &'a ClusterAssignment,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(store: &'a DocumentStore, assignment: &'a ClusterAssignment) -> Self {
        Self { store, assignment }
    }

    /// Build the graph: one node per document, one link per pair `i < j`
    /// with `matrix[i][j] >= threshold`.
    pub fn build(self, matrix: &SimilarityMatrix, threshold: f64) -> RelationshipGraph {
        let mut graph = RelationshipGraph::new(threshold, self.nodes());
        let documents = self.store.documents();

        for i in 0..matrix.len() {
            for j in (i + 1)..matrix.len() {
                let weight = matrix.get(i, j);
                if weight >= threshold {
                    graph.add_link(GraphLink {
                        source: documents[i].id.clone(),
                        target: documents[j].id.clone(),
                        weight,
                    });
                }
            }
        }

        let stats = graph.stats();
        info!(
            nodes = stats.total_nodes,
            links = stats.total_links,
            isolated = stats.isolated_nodes,
            threshold,
            "relationship graph built"
        );
        graph
    }

    fn nodes(&self) -> Vec<GraphNode> {
        self.store
            .documents()
            .iter()
            .zip(self.assignment.labels())
            .map(|(doc, label)| GraphNode {
                id: doc.id.clone(),
                title: doc.title.clone(),
                author: doc.author.clone(),
                cluster: *label,
            })
            .collect()
    }
}

/// Convenience wrapper around [`GraphBuilder`]
pub fn build_graph(
    store: &DocumentStore,
    assignment: &ClusterAssignment,
    matrix: &SimilarityMatrix,
    threshold: f64,
) -> RelationshipGraph {
    GraphBuilder::new(store, assignment).build(matrix, threshold)
}
