// pipeline/cluster.rs
// Phase 2: Cluster documents by embedding (k-means or DBSCAN)

use crate::error::{AnalysisError, DataError, Result};
use crate::pipeline::ingest::DocumentStore;
use linfa::traits::Transformer;
use linfa::DatasetBase;
use linfa_clustering::Dbscan;
use ndarray::{Array2, ArrayView1, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Below this many documents the centroid method puts everything in one cluster.
const MIN_DOCUMENTS_FOR_CENTROID: usize = 4;
const KMEANS_RESTARTS: usize = 10;
const KMEANS_MAX_ITERATIONS: usize = 300;
const KMEANS_TOLERANCE: f64 = 1e-4;

/// Clustering algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringMethod {
    /// k-means on standardized embeddings
    Centroid,
    /// DBSCAN with cosine distance; may leave noise points
    Density,
}

impl FromStr for ClusteringMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "centroid" | "kmeans" | "k-means" => Ok(Self::Centroid),
            "density" | "dbscan" | "hdbscan" => Ok(Self::Density),
            other => Err(AnalysisError::Config(format!(
                "unknown clustering method '{other}' (expected centroid or density)"
            ))),
        }
    }
}

impl fmt::Display for ClusteringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Centroid => f.write_str("centroid"),
            Self::Density => f.write_str("density"),
        }
    }
}

/// Configuration for clustering
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub method: ClusteringMethod,

    /// Number of k-means clusters; `None` derives it from the document count
    pub n_clusters: Option<usize>,

    /// DBSCAN neighbourhood radius as a cosine distance (density only)
    pub eps: f64,

    /// Neighbours, the point itself included, that make a core point (density only)
    pub min_samples: usize,

    /// Seed for k-means++ initialization
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            method: ClusteringMethod::Centroid,
            n_clusters: None,
            eps: 0.5,
            min_samples: 2,
            seed: 42,
        }
    }
}

/// Cluster label of one document.
///
/// Serialized as a plain integer with noise as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ClusterLabel {
    Cluster(u32),
    Noise,
}

impl ClusterLabel {
    pub fn cluster(&self) -> Option<u32> {
        match self {
            Self::Cluster(c) => Some(*c),
            Self::Noise => None,
        }
    }

    pub fn is_noise(&self) -> bool {
        matches!(self, Self::Noise)
    }
}

impl TryFrom<i64> for ClusterLabel {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        if value < 0 {
            return Ok(Self::Noise);
        }
        u32::try_from(value)
            .map(Self::Cluster)
            .map_err(|_| format!("cluster label {value} is out of range"))
    }
}

impl From<ClusterLabel> for i64 {
    fn from(label: ClusterLabel) -> Self {
        match label {
            ClusterLabel::Cluster(c) => c as i64,
            ClusterLabel::Noise => -1,
        }
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster(c) => write!(f, "{c}"),
            Self::Noise => f.write_str("noise"),
        }
    }
}

/// Document id -> cluster label, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    ids: Vec<String>,
    labels: Vec<ClusterLabel>,
    cluster_count: usize,
}

impl ClusterAssignment {
    /// Pair ids with labels. Returns `None` when the lengths differ.
    pub fn new(ids: Vec<String>, labels: Vec<ClusterLabel>) -> Option<Self> {
        if ids.len() != labels.len() {
            return None;
        }
        let mut clusters: Vec<u32> = labels.iter().filter_map(|l| l.cluster()).collect();
        clusters.sort_unstable();
        clusters.dedup();

        Some(Self {
            ids,
            labels,
            cluster_count: clusters.len(),
        })
    }

    /// Build from raw labels, renumbering clusters by first appearance.
    fn canonical(ids: Vec<String>, raw: &[Option<usize>]) -> Self {
        let mut renumbered: HashMap<usize, u32> = HashMap::new();
        let labels: Vec<ClusterLabel> = raw
            .iter()
            .map(|label| match label {
                Some(raw_id) => {
                    let next = renumbered.len() as u32;
                    ClusterLabel::Cluster(*renumbered.entry(*raw_id).or_insert(next))
                }
                None => ClusterLabel::Noise,
            })
            .collect();

        Self {
            ids,
            labels,
            cluster_count: renumbered.len(),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn labels(&self) -> &[ClusterLabel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of clusters, not counting noise.
    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn label_of(&self, id: &str) -> Option<ClusterLabel> {
        self.ids
            .iter()
            .position(|candidate| candidate == id)
            .map(|idx| self.labels[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ClusterLabel)> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.labels.iter().copied())
    }

    /// Sorted cluster numbers present in the assignment.
    pub fn clusters(&self) -> Vec<u32> {
        let mut clusters: Vec<u32> = self.labels.iter().filter_map(|l| l.cluster()).collect();
        clusters.sort_unstable();
        clusters.dedup();
        clusters
    }

    /// Document indices belonging to `cluster`, in document order.
    pub fn members(&self, cluster: u32) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == ClusterLabel::Cluster(cluster))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Ids of documents labelled as noise.
    pub fn unclustered(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, label)| label.is_noise())
            .map(|(id, _)| id.to_string())
            .collect()
    }
}

/// Assign a cluster label to every document.
pub fn fit(store: &DocumentStore, config: &ClusterConfig) -> Result<ClusterAssignment> {
    let n = store.len();
    if n < 2 {
        return Err(DataError::InsufficientData { found: n }.into());
    }

    let raw = match config.method {
        ClusteringMethod::Centroid => {
            if n < MIN_DOCUMENTS_FOR_CENTROID {
                info!(documents = n, "too few documents for k-means, using a single cluster");
                vec![Some(0); n]
            } else {
                let k = resolve_k(n, config.n_clusters)?;
                info!(k, documents = n, "running k-means");
                let data = standardize(&store.embedding_matrix());
                kmeans(&data, k, config.seed)
                    .into_iter()
                    .map(Some)
                    .collect()
            }
        }
        ClusteringMethod::Density => {
            info!(
                documents = n,
                min_samples = config.min_samples,
                eps = config.eps,
                "running DBSCAN"
            );
            run_dbscan(store, config)?
        }
    };

    let assignment = ClusterAssignment::canonical(store.ids(), &raw);
    info!(
        clusters = assignment.cluster_count(),
        noise = assignment.unclustered().len(),
        "clustering complete"
    );
    Ok(assignment)
}

/// Pick the number of k-means clusters.
///
/// Unset: `round(sqrt(n))` clamped to `[2, n - 1]`. Explicit values are
/// clamped to `n`.
pub fn resolve_k(n: usize, requested: Option<usize>) -> Result<usize> {
    match requested {
        Some(0) => Err(AnalysisError::Config(
            "n_clusters must be at least 1".to_string(),
        )),
        Some(k) if k > n => {
            tracing::warn!(requested = k, documents = n, "n_clusters exceeds document count, clamping");
            Ok(n)
        }
        Some(k) => Ok(k),
        None => {
            let k = (n as f64).sqrt().round() as usize;
            Ok(k.clamp(2, n.saturating_sub(1).max(2)))
        }
    }
}

/// Zero mean, unit variance per dimension. Constant dimensions are only centered.
fn standardize(data: &Array2<f64>) -> Array2<f64> {
    let mut scaled = data.clone();
    for mut column in scaled.axis_iter_mut(Axis(1)) {
        let n = column.len() as f64;
        let mean = column.sum() / n;
        let variance = column.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        column.mapv_inplace(|x| {
            if std > 1e-12 {
                (x - mean) / std
            } else {
                x - mean
            }
        });
    }
    scaled
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Best of several seeded k-means++ / Lloyd runs (lowest inertia).
fn kmeans(data: &Array2<f64>, k: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut best: Option<(f64, Vec<usize>)> = None;

    for restart in 0..KMEANS_RESTARTS {
        let (labels, inertia) = lloyd(data, k, &mut rng);
        debug!(restart, inertia, "k-means restart finished");
        if best.as_ref().map_or(true, |(best_inertia, _)| inertia < *best_inertia) {
            best = Some((inertia, labels));
        }
    }

    best.map(|(_, labels)| labels).unwrap_or_default()
}

fn lloyd(data: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> (Vec<usize>, f64) {
    let mut centroids = kmeans_plus_plus(data, k, rng);
    let mut assigned = assign(data, &centroids);

    for _ in 0..KMEANS_MAX_ITERATIONS {
        let labels: Vec<usize> = assigned.iter().map(|(label, _)| *label).collect();
        let updated = update_centroids(data, &labels, &centroids);
        let shift: f64 = centroids
            .outer_iter()
            .zip(updated.outer_iter())
            .map(|(old, new)| squared_distance(old, new))
            .sum();

        centroids = updated;
        assigned = assign(data, &centroids);
        if shift <= KMEANS_TOLERANCE {
            break;
        }
    }

    let inertia = assigned.iter().map(|(_, dist)| dist).sum();
    (assigned.into_iter().map(|(label, _)| label).collect(), inertia)
}

/// k-means++ seeding: each next centroid sampled proportional to squared
/// distance from the nearest one already chosen.
fn kmeans_plus_plus(data: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
    let (n, d) = data.dim();
    let mut centroids = Array2::zeros((k, d));
    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    for c in 1..k {
        let distances: Vec<f64> = data
            .outer_iter()
            .map(|point| {
                (0..c)
                    .map(|j| squared_distance(point, centroids.row(j)))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();

        let chosen = if total > 0.0 {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            distances
                .iter()
                .position(|dist| {
                    cumulative += dist;
                    cumulative >= threshold
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(chosen));
    }

    centroids
}

/// Nearest centroid per point. Ties go to the lowest centroid index.
fn assign(data: &Array2<f64>, centroids: &Array2<f64>) -> Vec<(usize, f64)> {
    (0..data.nrows())
        .into_par_iter()
        .map(|i| {
            let point = data.row(i);
            let mut best = (0, f64::INFINITY);
            for (c, centroid) in centroids.outer_iter().enumerate() {
                let dist = squared_distance(point, centroid);
                if dist < best.1 {
                    best = (c, dist);
                }
            }
            best
        })
        .collect()
}

/// Mean of each cluster's points. A cluster left empty keeps its centroid.
fn update_centroids(data: &Array2<f64>, labels: &[usize], previous: &Array2<f64>) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros(previous.dim());
    let mut counts = vec![0usize; previous.nrows()];

    for (point, &label) in data.outer_iter().zip(labels) {
        let mut row = sums.row_mut(label);
        row += &point;
        counts[label] += 1;
    }

    for (c, &count) in counts.iter().enumerate() {
        if count > 0 {
            sums.row_mut(c).mapv_inplace(|v| v / count as f64);
        } else {
            sums.row_mut(c).assign(&previous.row(c));
        }
    }
    sums
}

/// Euclidean radius between unit vectors at cosine distance `eps`:
/// `|a - b|^2 = 2 (1 - cos)`.
pub fn unit_sphere_radius(eps: f64) -> f64 {
    (2.0 * eps.max(0.0)).sqrt()
}

/// Run DBSCAN on L2-normalized embeddings, so the Euclidean radius matches
/// the cosine distance `eps`. `None` marks noise.
fn run_dbscan(store: &DocumentStore, config: &ClusterConfig) -> Result<Vec<Option<usize>>> {
    let n = store.len();
    let d = store.dimension();
    let documents = store.documents();
    let normalized: Vec<Vec<f64>> = documents
        .iter()
        .map(|doc| l2_normalized(&doc.embedding))
        .collect();
    let data = Array2::from_shape_fn((n, d), |(i, j)| normalized[i][j]);

    // linfa rejects fewer than 2 points per neighbourhood
    let min_points = config.min_samples.max(2);
    let radius = unit_sphere_radius(config.eps);
    debug!(min_points, radius, "DBSCAN parameters");

    let clusters = Dbscan::params(min_points)
        .tolerance(radius)
        .transform(DatasetBase::from(data))
        .map_err(|e| AnalysisError::Clustering(format!("DBSCAN failed: {e:?}")))?;

    Ok(clusters.targets().iter().copied().collect())
}

fn l2_normalized(vector: &[f64]) -> Vec<f64> {
    let magnitude = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
    if magnitude > 0.0 {
        vector.iter().map(|x| x / magnitude).collect()
    } else {
        vector.to_vec()
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
                id: format!("doc{i}"),
                title: format!("Document {i}"),
                author: String::new(),
                summary: String::new(),
                embedding: v.clone(),
            })
            .collect();
        DocumentStore::new(docs).unwrap()
    }

    fn two_groups() -> Vec<Vec<f64>> {
        vec![
            vec![10.0, 0.0, 0.1],
            vec![10.2, 0.1, 0.0],
            vec![9.9, -0.1, 0.05],
            vec![0.0, 10.0, 0.1],
            vec![0.1, 10.1, 0.0],
            vec![-0.1, 9.8, 0.05],
        ]
    }

    #[test]
    fn auto_k_follows_square_root_rule() {
        assert_eq!(resolve_k(6, None).unwrap(), 2);
        assert_eq!(resolve_k(4, None).unwrap(), 2);
        assert_eq!(resolve_k(50, None).unwrap(), 7);
        assert_eq!(resolve_k(10, Some(20)).unwrap(), 10);
        assert!(matches!(resolve_k(10, Some(0)), Err(AnalysisError::Config(_))));
    }

    #[test]
    fn centroid_separates_two_groups() {
        let assignment = fit(&store(&two_groups()), &ClusterConfig::default()).unwrap();
        assert_eq!(assignment.cluster_count(), 2);

        let labels = assignment.labels();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        // canonical numbering follows document order
        assert_eq!(labels[0], ClusterLabel::Cluster(0));
    }

    #[test]
    fn tiny_inputs_collapse_to_one_cluster() {
        let assignment = fit(
            &store(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![5.0, 5.0]]),
            &ClusterConfig::default(),
        )
        .unwrap();
        assert_eq!(assignment.cluster_count(), 1);
        assert!(assignment
            .labels()
            .iter()
            .all(|l| *l == ClusterLabel::Cluster(0)));
    }

    #[test]
    fn centroid_is_deterministic() {
        let vectors: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![(i as f64).sin(), (i as f64 * 0.7).cos(), i as f64 / 20.0])
            .collect();
        let s = store(&vectors);
        let first = fit(&s, &ClusterConfig::default()).unwrap();
        let second = fit(&s, &ClusterConfig::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn density_marks_outliers_as_noise() {
        let mut vectors = vec![
            vec![1.0, 0.01, 0.0],
            vec![1.0, 0.0, 0.02],
            vec![1.0, 0.02, 0.01],
            vec![0.01, 1.0, 0.0],
            vec![0.0, 1.0, 0.02],
            vec![0.02, 1.0, 0.01],
        ];
        vectors.push(vec![-1.0, -1.0, 0.0]);
        let assignment = fit(&store(&vectors), &density()).unwrap();
        let labels = assignment.labels();
        assert_eq!(labels.len(), 7);
        assert!(!labels[0].is_noise());
        assert!(labels[..3].iter().all(|l| *l == labels[0]));
        assert!(!labels[3].is_noise());
        assert!(labels[3..6].iter().all(|l| *l == labels[3]));
        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[6], ClusterLabel::Noise);
        assert_eq!(assignment.unclustered(), vec!["doc6".to_string()]);
    }

    fn density() -> ClusterConfig {
        ClusterConfig {
            method: ClusteringMethod::Density,
            ..ClusterConfig::default()
        }
    }

    #[test]
    fn density_keeps_a_tight_group_together() {
        let vectors = vec![
            vec![1.0, 0.10, 0.0],
            vec![1.0, 0.12, 0.01],
            vec![1.0, 0.08, 0.02],
            vec![1.0, 0.11, 0.0],
            vec![1.0, 0.09, 0.01],
            vec![0.0, 0.0, 1.0],
        ];
        let assignment = fit(&store(&vectors), &density()).unwrap();
        let labels = assignment.labels();

        assert_eq!(assignment.cluster_count(), 1);
        assert!(labels[..5].iter().all(|l| *l == ClusterLabel::Cluster(0)));
        assert_eq!(labels[5], ClusterLabel::Noise);
    }

    #[test]
    fn density_puts_identical_documents_in_one_cluster() {
        let vectors = vec![vec![0.3, 0.4, 0.5]; 6];
        let assignment = fit(&store(&vectors), &density()).unwrap();
        assert_eq!(assignment.cluster_count(), 1);
        assert!(assignment.unclustered().is_empty());
    }

    #[test]
    fn density_pairs_two_close_documents() {
        let vectors = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![-1.0, 0.0]];
        let assignment = fit(&store(&vectors), &density()).unwrap();
        let labels = assignment.labels();

        assert!(!labels[0].is_noise());
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], ClusterLabel::Noise);
    }

    #[test]
    fn radius_matches_cosine_distance() {
        assert!((unit_sphere_radius(0.5) - 1.0).abs() < 1e-12);
        assert_eq!(unit_sphere_radius(0.0), 0.0);
        let a = l2_normalized(&[1.0, 0.0]);
        let b = l2_normalized(&[1.0, 1.0]);
        let euclidean: f64 = a.iter().zip(&b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt();
        let cosine_distance = 1.0 - std::f64::consts::FRAC_1_SQRT_2;
        assert!((unit_sphere_radius(cosine_distance) - euclidean).abs() < 1e-12);
    }

    #[test]
    fn label_serializes_noise_as_minus_one() {
        let json = serde_json::to_string(&vec![ClusterLabel::Cluster(3), ClusterLabel::Noise])
            .unwrap();
        assert_eq!(json, "[3,-1]");
        let back: Vec<ClusterLabel> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![ClusterLabel::Cluster(3), ClusterLabel::Noise]);
    }

    #[test]
    fn label_beyond_u32_is_rejected() {
        let max: Vec<ClusterLabel> = serde_json::from_str("[4294967295]").unwrap();
        assert_eq!(max, vec![ClusterLabel::Cluster(u32::MAX)]);
        assert!(serde_json::from_str::<Vec<ClusterLabel>>("[4294967296]").is_err());
        assert!(ClusterLabel::try_from(i64::MAX).is_err());
    }

    #[test]
    fn parses_method_aliases() {
        assert_eq!("kmeans".parse::<ClusteringMethod>().unwrap(), ClusteringMethod::Centroid);
        assert_eq!("DBSCAN".parse::<ClusteringMethod>().unwrap(), ClusteringMethod::Density);
        assert!("spectral".parse::<ClusteringMethod>().is_err());
    }
}
