// pipeline/project.rs
// Phase 5: 2D neighbourhood-preserving layout (exact t-SNE)

use crate::pipeline::ingest::DocumentStore;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const ENTROPY_TOLERANCE: f64 = 1e-5;
const BINARY_SEARCH_STEPS: usize = 100;
const MIN_PROBABILITY: f64 = 1e-12;
const INITIAL_STD: f64 = 1e-4;
const MIN_GAIN: f64 = 0.01;

/// Configuration for the t-SNE layout
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionConfig {
    /// Requested perplexity; lowered automatically for small inputs
    pub perplexity: f64,

    /// Seed for the initial layout. Fixed so runs are reproducible.
    pub seed: u64,

    pub iterations: usize,
    pub early_exaggeration: f64,
    pub exaggeration_iterations: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            seed: 42,
            iterations: 1000,
            early_exaggeration: 12.0,
            exaggeration_iterations: 250,
        }
    }
}

/// Document id -> (x, y), in document order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub ids: Vec<String>,
    pub coordinates: Vec<[f64; 2]>,
    pub perplexity: f64,
}

impl Projection {
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<[f64; 2]> {
        self.ids
            .iter()
            .position(|candidate| candidate == id)
            .map(|idx| self.coordinates[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, [f64; 2])> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.coordinates.iter().copied())
    }
}

/// Perplexity actually used for `n` points: `min(requested, floor((n-1)/3))`,
/// never below 1.
pub fn effective_perplexity(n: usize, requested: f64) -> f64 {
    let cap = (n.saturating_sub(1) / 3) as f64;
    requested.min(cap).max(1.0)
}

/// Lay the documents out in 2D.
///
/// Identical embeddings and configuration always give identical coordinates:
/// the initial layout is seeded and every reduction runs in a fixed order.
pub fn project(store: &DocumentStore, config: &ProjectionConfig) -> Projection {
    let data = store.embedding_matrix();
    let n = data.nrows();
    let perplexity = effective_perplexity(n, config.perplexity);
    info!(documents = n, perplexity, "running t-SNE");

    let p = joint_probabilities(&data, perplexity);

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut y = Array2::from_shape_fn((n, 2), |_| {
        rng.sample::<f64, _>(StandardNormal) * INITIAL_STD
    });
    let mut update = Array2::<f64>::zeros((n, 2));
    let mut gains = Array2::<f64>::ones((n, 2));
    let learning_rate = (n as f64 / config.early_exaggeration / 4.0).max(50.0);

    for iteration in 0..config.iterations {
        let exaggerating = iteration < config.exaggeration_iterations;
        let exaggeration = if exaggerating {
            config.early_exaggeration
        } else {
            1.0
        };
        let momentum = if exaggerating { 0.5 } else { 0.8 };

        let grad = gradient(&p, &y, exaggeration);
        for ((g, u), gain) in grad.iter().zip(update.iter_mut()).zip(gains.iter_mut()) {
            let adjusted = if *u * *g < 0.0 {
                *gain + 0.2
            } else {
                *gain * 0.8
            };
            *gain = adjusted.max(MIN_GAIN);
            *u = momentum * *u - learning_rate * *gain * *g;
        }
        y += &update;
        recenter(&mut y);

        if iteration % 250 == 0 {
            debug!(iteration, "t-SNE progress");
        }
    }

    info!(kl_divergence = kl_divergence(&p, &y), "t-SNE finished");

    Projection {
        ids: store.ids(),
        coordinates: y.outer_iter().map(|row| [row[0], row[1]]).collect(),
        perplexity,
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Symmetrized joint probabilities `P = (P + P^T) / sum`.
fn joint_probabilities(data: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = data.nrows();
    let rows: Vec<Vec<f64>> = data.outer_iter().map(|r| r.to_vec()).collect();

    let conditional: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let distances: Vec<f64> = rows.iter().map(|r| squared_distance(&rows[i], r)).collect();
            conditional_row(&distances, i, perplexity)
        })
        .collect();

    let mut p = Array2::<f64>::zeros((n, n));
    let mut total = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                let value = conditional[i][j] + conditional[j][i];
                p[[i, j]] = value;
                total += value;
            }
        }
    }

    for i in 0..n {
        for j in 0..n {
            if i != j {
                p[[i, j]] = if total > 0.0 {
                    (p[[i, j]] / total).max(MIN_PROBABILITY)
                } else {
                    MIN_PROBABILITY
                };
            }
        }
    }
    p
}

/// Gaussian conditional probabilities of point `i`, with the precision found
/// by binary search so the row entropy matches `ln(perplexity)`.
fn conditional_row(distances: &[f64], i: usize, perplexity: f64) -> Vec<f64> {
    let n = distances.len();
    let target = perplexity.ln();

    // shifting by the nearest distance keeps exp() from underflowing
    let nearest = distances
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, d)| *d)
        .fold(f64::INFINITY, f64::min);
    let shifted: Vec<f64> = distances
        .iter()
        .map(|d| if nearest.is_finite() { d - nearest } else { *d })
        .collect();

    let mut row = vec![0.0; n];
    let mut beta = 1.0;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;

    for _ in 0..BINARY_SEARCH_STEPS {
        let mut sum = 0.0;
        for j in 0..n {
            row[j] = if j == i { 0.0 } else { (-shifted[j] * beta).exp() };
            sum += row[j];
        }
        if sum == 0.0 {
            sum = 1e-8;
        }

        let mut weighted = 0.0;
        for j in 0..n {
            row[j] /= sum;
            weighted += shifted[j] * row[j];
        }

        let entropy = sum.ln() + beta * weighted;
        let diff = entropy - target;
        if diff.abs() <= ENTROPY_TOLERANCE {
            break;
        }

        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() {
                beta * 2.0
            } else {
                (beta + beta_max) / 2.0
            };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() {
                beta / 2.0
            } else {
                (beta + beta_min) / 2.0
            };
        }
    }

    row
}

/// Student-t kernel between layout points; zero on the diagonal.
fn kernel_rows(y: &Array2<f64>) -> Vec<Vec<f64>> {
    let n = y.nrows();
    (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        0.0
                    } else {
                        let dx = y[[i, 0]] - y[[j, 0]];
                        let dy = y[[i, 1]] - y[[j, 1]];
                        1.0 / (1.0 + dx * dx + dy * dy)
                    }
                })
                .collect()
        })
        .collect()
}

fn kernel_total(kernel: &[Vec<f64>]) -> f64 {
    // row sums first, then a sequential fold, so the order never varies
    let row_sums: Vec<f64> = kernel.iter().map(|row| row.iter().sum()).collect();
    row_sums.iter().sum::<f64>().max(f64::MIN_POSITIVE)
}

/// KL gradient `4 * sum_j (e * p_ij - q_ij) * k_ij * (y_i - y_j)`.
fn gradient(p: &Array2<f64>, y: &Array2<f64>, exaggeration: f64) -> Array2<f64> {
    let n = y.nrows();
    let kernel = kernel_rows(y);
    let total = kernel_total(&kernel);

    let rows: Vec<[f64; 2]> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut g = [0.0; 2];
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = (kernel[i][j] / total).max(MIN_PROBABILITY);
                let mult = (exaggeration * p[[i, j]] - q) * kernel[i][j];
                g[0] += mult * (y[[i, 0]] - y[[j, 0]]);
                g[1] += mult * (y[[i, 1]] - y[[j, 1]]);
            }
            [4.0 * g[0], 4.0 * g[1]]
        })
        .collect();

    Array2::from_shape_fn((n, 2), |(i, d)| rows[i][d])
}

fn recenter(y: &mut Array2<f64>) {
    let n = y.nrows() as f64;
    for d in 0..2 {
        let mean = y.column(d).sum() / n;
        y.column_mut(d).mapv_inplace(|v| v - mean);
    }
}

fn kl_divergence(p: &Array2<f64>, y: &Array2<f64>) -> f64 {
    let kernel = kernel_rows(y);
    let total = kernel_total(&kernel);
    let mut kl = 0.0;
    for ((i, j), &pij) in p.indexed_iter() {
        if i != j {
            let q = (kernel[i][j] / total).max(MIN_PROBABILITY);
            kl += pij * (pij / q).ln();
        }
    }
    kl
}
