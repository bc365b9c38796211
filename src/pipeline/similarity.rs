// pipeline/similarity.rs
// Phase 3: Pairwise document similarity

use crate::error::AnalysisError;
use crate::pipeline::ingest::DocumentStore;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Similarity metric between two embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    /// Cosine of the angle between the vectors
    #[default]
    Cosine,
    /// `1 / (1 + euclidean distance)`
    Euclidean,
    /// Pearson correlation of the vector entries
    Pearson,
}

impl FromStr for SimilarityMetric {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "pearson" | "correlation" => Ok(Self::Pearson),
            other => Err(AnalysisError::Config(format!(
                "unknown similarity metric '{other}' (expected cosine, euclidean or pearson)"
            ))),
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::Euclidean => f.write_str("euclidean"),
            Self::Pearson => f.write_str("pearson"),
        }
    }
}

/// Symmetric `n x n` similarity matrix in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    metric: SimilarityMetric,
    values: Array2<f64>,
}

impl SimilarityMatrix {
    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Rows as nested vectors, for serialization.
    pub fn to_nested(&self) -> Vec<Vec<f64>> {
        self.values.outer_iter().map(|row| row.to_vec()).collect()
    }
}

/// Compute the full similarity matrix.
///
/// Only the upper triangle is evaluated; the lower one is mirrored so the
/// result is exactly symmetric.
pub fn compute(store: &DocumentStore, metric: SimilarityMetric) -> SimilarityMatrix {
    let vectors: Vec<Vec<f64>> = match metric {
        SimilarityMetric::Pearson => store
            .documents()
            .iter()
            .map(|doc| centered(&doc.embedding))
            .collect(),
        _ => store
            .documents()
            .iter()
            .map(|doc| doc.embedding.clone())
            .collect(),
    };
    let norms: Vec<f64> = vectors.iter().map(|v| magnitude(v)).collect();
    let n = vectors.len();

    // Each row owns its own output slot
    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i..n)
                .map(|j| {
                    let value = match metric {
                        SimilarityMetric::Cosine | SimilarityMetric::Pearson => {
                            cosine_with_norms(&vectors[i], &vectors[j], norms[i], norms[j])
                        }
                        SimilarityMetric::Euclidean => {
                            1.0 / (1.0 + euclidean_distance(&vectors[i], &vectors[j]))
                        }
                    };
                    finite_or_zero(value)
                })
                .collect()
        })
        .collect();

    let mut values = Array2::zeros((n, n));
    for (i, row) in upper.iter().enumerate() {
        for (offset, &value) in row.iter().enumerate() {
            let j = i + offset;
            values[[i, j]] = value;
            values[[j, i]] = value;
        }
    }

    info!(documents = n, %metric, "similarity matrix computed");
    SimilarityMatrix { metric, values }
}

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn cosine_with_norms(a: &[f64], b: &[f64], mag_a: f64, mag_b: f64) -> f64 {
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

fn magnitude(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn centered(v: &[f64]) -> Vec<f64> {
    if v.is_empty() {
        return Vec::new();
    }
    let mean = v.iter().sum::<f64>() / v.len() as f64;
    v.iter().map(|x| x - mean).collect()
}

/// NaN and infinities never reach the matrix.
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingest::Document;

    fn store(vectors: &[Vec<f64>]) -> DocumentStore {
        let docs = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| Document {
                id: format!("d{i}"),
                title: String::new(),
                author: String::new(),
                summary: String::new(),
                embedding: v.clone(),
            })
            .collect();
        DocumentStore::new(docs).unwrap()
    }

    #[test]
    fn cosine_matches_known_values() {
        let m = compute(
            &store(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]),
            SimilarityMetric::Cosine,
        );
        assert!((m.get(0, 0) - 1.0).abs() < 1e-12);
        assert!(m.get(0, 1).abs() < 1e-12);
        assert!((m.get(0, 2) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn zero_vectors_have_zero_cosine_and_pearson() {
        let s = store(&[vec![0.0, 0.0, 0.0], vec![1.0, 2.0, 3.0], vec![2.0, 2.0, 2.0]]);
        let cosine = compute(&s, SimilarityMetric::Cosine);
        assert_eq!(cosine.get(0, 1), 0.0);
        assert_eq!(cosine.get(0, 0), 0.0);

        let pearson = compute(&s, SimilarityMetric::Pearson);
        // the constant vector has zero variance
        assert_eq!(pearson.get(1, 2), 0.0);
        assert_eq!(pearson.get(2, 2), 0.0);
        assert!(pearson.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn pearson_keeps_negative_correlation() {
        let m = compute(
            &store(&[vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]]),
            SimilarityMetric::Pearson,
        );
        assert!((m.get(0, 1) + 1.0).abs() < 1e-12);
        assert!((m.get(0, 0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn euclidean_uses_inverse_distance() {
        let m = compute(
            &store(&[vec![0.0, 0.0], vec![3.0, 4.0]]),
            SimilarityMetric::Euclidean,
        );
        assert!((m.get(0, 1) - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(m.get(1, 1), 1.0);
    }

    #[test]
    fn matrix_is_exactly_symmetric() {
        let vectors: Vec<Vec<f64>> = (0..12)
            .map(|i| (0..7).map(|j| ((i * 7 + j) as f64 * 0.37).sin()).collect())
            .collect();
        for metric in [
            SimilarityMetric::Cosine,
            SimilarityMetric::Euclidean,
            SimilarityMetric::Pearson,
        ] {
            let m = compute(&store(&vectors), metric);
            assert_eq!(m.values(), &m.values().t());
        }
    }

    #[test]
    fn parses_metric_names() {
        assert_eq!("correlation".parse::<SimilarityMetric>().unwrap(), SimilarityMetric::Pearson);
        assert!(matches!(
            "manhattan".parse::<SimilarityMetric>(),
            Err(AnalysisError::Config(_))
        ));
    }
}
