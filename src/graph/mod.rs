// graph/mod.rs
// Relationship graph between documents: node-link form

pub mod builder;

use crate::pipeline::cluster::ClusterLabel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for graph nodes (the document id)
pub type NodeId = String;

/// Thresholded similarity graph over the documents of a run.
///
/// Nodes are in document order. Links are undirected; each unordered pair
/// appears at most once and never as a self-loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipGraph {
    pub threshold: f64,
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

/// A document in the graph with the metadata shown by the visualization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub title: String,
    pub author: String,
    pub cluster: ClusterLabel,
}

/// Undirected similarity link between two documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f64,
}

impl RelationshipGraph {
    /// Create a graph with nodes but no links yet
    pub fn new(threshold: f64, nodes: Vec<GraphNode>) -> Self {
        Self {
            threshold,
            nodes,
            links: Vec::new(),
        }
    }

    pub fn add_link(&mut self, link: GraphLink) {
        self.links.push(link);
    }

    /// All links touching a node
    pub fn links_of(&self, id: &str) -> Vec<&GraphLink> {
        self.links
            .iter()
            .filter(|l| l.source == id || l.target == id)
            .collect()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.links_of(id).len()
    }

    /// Serialize graph to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize graph from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Get statistics about the graph
    pub fn stats(&self) -> GraphStats {
        let mut degrees: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for link in &self.links {
            *degrees.entry(link.source.as_str()).or_insert(0) += 1;
            *degrees.entry(link.target.as_str()).or_insert(0) += 1;
        }

        let isolated_nodes = degrees.values().filter(|&&d| d == 0).count();
        let mean_degree = if self.nodes.is_empty() {
            0.0
        } else {
            2.0 * self.links.len() as f64 / self.nodes.len() as f64
        };

        GraphStats {
            total_nodes: self.nodes.len(),
            total_links: self.links.len(),
            isolated_nodes,
            mean_degree,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_links: usize,
    pub isolated_nodes: usize,
    pub mean_degree: f64,
}
