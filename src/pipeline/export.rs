// pipeline/export.rs
// Phase 8: Structured results document

use crate::error::{AnalysisError, Result};
use crate::graph::RelationshipGraph;
use crate::pipeline::cluster::{ClusterAssignment, ClusterLabel, ClusteringMethod};
use crate::pipeline::ingest::DocumentStore;
use crate::pipeline::similarity::SimilarityMetric;
use crate::pipeline::summarize::ClusterSummary;
use crate::pipeline::Analysis;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything a run produced, in input document order.
///
/// Built only from its inputs, so two runs over the same documents and
/// configuration serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub n_documents: usize,
    pub embedding_dimension: usize,
    pub n_clusters: usize,
    pub clustering_method: ClusteringMethod,
    pub similarity_metric: SimilarityMetric,
    pub similarity_threshold: f64,
    pub perplexity: f64,
    pub input_fingerprint: String,
    pub document_metadata: Vec<DocumentMetadata>,
    pub cluster_labels: Vec<ClusterLabel>,
    pub unclustered: Vec<String>,
    pub cluster_summaries: BTreeMap<u32, ClusterSummary>,
    pub cluster_wordclouds: BTreeMap<u32, PathBuf>,
    pub similarity_matrix: Vec<Vec<f64>>,
    pub network_graph: RelationshipGraph,
    pub tsne_coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub title: String,
    pub author: String,
}

impl AnalysisResults {
    pub fn from_analysis(analysis: &Analysis) -> Self {
        let store = &analysis.store;

        Self {
            n_documents: store.len(),
            embedding_dimension: store.dimension(),
            n_clusters: analysis.assignment.cluster_count(),
            clustering_method: analysis.method,
            similarity_metric: analysis.similarity.metric(),
            similarity_threshold: analysis.graph.threshold,
            perplexity: analysis.projection.perplexity,
            input_fingerprint: input_fingerprint(store),
            document_metadata: store
                .documents()
                .iter()
                .map(|doc| DocumentMetadata {
                    document_id: doc.id.clone(),
                    title: doc.title.clone(),
                    author: doc.author.clone(),
                })
                .collect(),
            cluster_labels: analysis.assignment.labels().to_vec(),
            unclustered: analysis.assignment.unclustered(),
            cluster_summaries: analysis.summaries.clone(),
            cluster_wordclouds: analysis.wordclouds.clone(),
            similarity_matrix: analysis.similarity.to_nested(),
            network_graph: analysis.graph.clone(),
            tsne_coordinates: analysis.projection.coordinates.clone(),
        }
    }

    /// Rebuild the cluster assignment recorded in the document.
    pub fn assignment(&self) -> Result<ClusterAssignment> {
        let ids = self
            .document_metadata
            .iter()
            .map(|m| m.document_id.clone())
            .collect();
        ClusterAssignment::new(ids, self.cluster_labels.clone()).ok_or_else(|| {
            AnalysisError::Config(format!(
                "results list {} documents but {} cluster labels",
                self.document_metadata.len(),
                self.cluster_labels.len()
            ))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AnalysisError::io(parent, e))?;
        }
        fs::write(path, json).map_err(|e| AnalysisError::io(path, e))?;
        info!(path = %path.display(), documents = self.n_documents, "results saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// SHA-256 over document ids and embeddings, hex encoded.
pub fn input_fingerprint(store: &DocumentStore) -> String {
    let mut hasher = Sha256::new();
    for doc in store.documents() {
        hasher.update(doc.id.as_bytes());
        hasher.update([0u8]);
        for value in &doc.embedding {
            hasher.update(value.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}
