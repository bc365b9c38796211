// config.rs
// Run configuration, read from the environment at the binary's entry point

use crate::error::{AnalysisError, Result};
use crate::pipeline::cluster::ClusterConfig;
use crate::pipeline::project::ProjectionConfig;
use crate::pipeline::similarity::SimilarityMetric;
use crate::pipeline::summarize::SummaryConfig;
use crate::pipeline::wordcloud::WordCloudStyle;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Everything a run needs, threaded explicitly through the pipeline
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub enable_post_processing: bool,
    /// Directory of `*_vector.json` files or a single JSON array file
    pub input: PathBuf,
    pub cluster: ClusterConfig,
    pub similarity_metric: SimilarityMetric,
    pub similarity_threshold: f64,
    pub projection: ProjectionConfig,
    pub output_results_path: PathBuf,
    pub output_visualization_path: PathBuf,
    pub wordcloud_dir: PathBuf,
    pub wordcloud_style: WordCloudStyle,
    pub summary: SummaryConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enable_post_processing: true,
            input: PathBuf::from("./production"),
            cluster: ClusterConfig::default(),
            similarity_metric: SimilarityMetric::Cosine,
            similarity_threshold: 0.7,
            projection: ProjectionConfig::default(),
            output_results_path: PathBuf::from("analysis_results.json"),
            output_visualization_path: PathBuf::from("visualization.html"),
            wordcloud_dir: PathBuf::from("."),
            wordcloud_style: WordCloudStyle::default(),
            summary: SummaryConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Read the process environment on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("ENABLE_POST_PROCESSING") {
            config.enable_post_processing = parse_bool("ENABLE_POST_PROCESSING", &v)?;
        }
        if let Some(v) = get("PRODUCTION_DIR") {
            config.input = PathBuf::from(v);
        }
        if let Some(v) = get("CLUSTERING_METHOD") {
            config.cluster.method = v.parse()?;
        }
        if let Some(v) = get("N_CLUSTERS") {
            config.cluster.n_clusters = Some(parse_value("N_CLUSTERS", &v)?);
        }
        if let Some(v) = get("DBSCAN_EPS") {
            config.cluster.eps = parse_value("DBSCAN_EPS", &v)?;
        }
        if let Some(v) = get("DBSCAN_MIN_SAMPLES") {
            config.cluster.min_samples = parse_value("DBSCAN_MIN_SAMPLES", &v)?;
        }
        if let Some(v) = get("SIMILARITY_METRIC") {
            config.similarity_metric = v.parse()?;
        }
        if let Some(v) = get("SIMILARITY_THRESHOLD") {
            config.similarity_threshold = parse_value("SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = get("TSNE_PERPLEXITY") {
            config.projection.perplexity = parse_value("TSNE_PERPLEXITY", &v)?;
        }
        if let Some(v) = get("OUTPUT_RESULTS_PATH") {
            config.output_results_path = PathBuf::from(v);
        }
        if let Some(v) = get("OUTPUT_VISUALIZATION_PATH") {
            config.output_visualization_path = PathBuf::from(v);
        }
        if let Some(v) = get("WORDCLOUD_DIR") {
            config.wordcloud_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ENABLE_SUMMARIES") {
            config.summary.enabled = parse_bool("ENABLE_SUMMARIES", &v)?;
        }
        if let Some(v) = get("OPENAI_MODEL") {
            config.summary.model = v;
        }
        // the openai crate historically reads OPENAI_KEY
        config.summary.api_key = get("OPENAI_API_KEY").or_else(|| get("OPENAI_KEY"));
        config.summary.base_url = get("OPENAI_BASE_URL");
        if let Some(v) = get("SUMMARY_TIMEOUT_SECS") {
            config.summary.timeout = Duration::from_secs(parse_value("SUMMARY_TIMEOUT_SECS", &v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values no stage can work with. Runs before any computation.
    pub fn validate(&self) -> Result<()> {
        if !self.similarity_threshold.is_finite() {
            return Err(AnalysisError::Config(format!(
                "similarity threshold must be a finite number, got {}",
                self.similarity_threshold
            )));
        }
        if !(self.projection.perplexity.is_finite() && self.projection.perplexity > 0.0) {
            return Err(AnalysisError::Config(format!(
                "perplexity must be positive, got {}",
                self.projection.perplexity
            )));
        }
        if self.cluster.n_clusters == Some(0) {
            return Err(AnalysisError::Config("n_clusters must be at least 1".to_string()));
        }
        if !(self.cluster.eps.is_finite() && self.cluster.eps >= 0.0) {
            return Err(AnalysisError::Config(format!(
                "eps must be a non-negative number, got {}",
                self.cluster.eps
            )));
        }
        if self.cluster.min_samples == 0 {
            return Err(AnalysisError::Config("min_samples must be at least 1".to_string()));
        }
        if self.summary.timeout.is_zero() {
            return Err(AnalysisError::Config("summary timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// Accepts `1/0`, `true/false` and `yes/no` in any case
pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AnalysisError::Config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AnalysisError::Config(format!("invalid value for {key}: '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cluster::ClusteringMethod;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> Result<AnalysisConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AnalysisConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = lookup(&[]).unwrap();
        assert!(config.enable_post_processing);
        assert_eq!(config.cluster.method, ClusteringMethod::Centroid);
        assert_eq!(config.cluster.n_clusters, None);
        assert_eq!(config.similarity_metric, SimilarityMetric::Cosine);
        assert_eq!(config.similarity_threshold, 0.7);
        assert_eq!(config.projection.perplexity, 30.0);
        assert_eq!(config.output_results_path, PathBuf::from("analysis_results.json"));
        assert_eq!(config.summary.timeout, Duration::from_secs(120));
    }

    #[test]
    fn variables_override_defaults() {
        let config = lookup(&[
            ("ENABLE_POST_PROCESSING", "no"),
            ("CLUSTERING_METHOD", "dbscan"),
            ("N_CLUSTERS", "4"),
            ("DBSCAN_EPS", "0.3"),
            ("SIMILARITY_METRIC", "correlation"),
            ("SIMILARITY_THRESHOLD", "0.85"),
            ("TSNE_PERPLEXITY", "5"),
            ("ENABLE_SUMMARIES", "0"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1/"),
            ("SUMMARY_TIMEOUT_SECS", "10"),
        ])
        .unwrap();

        assert!(!config.enable_post_processing);
        assert_eq!(config.cluster.method, ClusteringMethod::Density);
        assert_eq!(config.cluster.n_clusters, Some(4));
        assert_eq!(config.cluster.eps, 0.3);
        assert_eq!(config.similarity_metric, SimilarityMetric::Pearson);
        assert_eq!(config.similarity_threshold, 0.85);
        assert_eq!(config.projection.perplexity, 5.0);
        assert!(!config.summary.enabled);
        assert_eq!(
            config.summary.base_url.as_deref(),
            Some("http://localhost:11434/v1/")
        );
        assert_eq!(config.summary.timeout, Duration::from_secs(10));
    }

    #[test]
    fn unknown_method_is_a_config_error() {
        let err = lookup(&[("CLUSTERING_METHOD", "spectral")]).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        for pairs in [
            [("SIMILARITY_THRESHOLD", "high")],
            [("SIMILARITY_THRESHOLD", "NaN")],
            [("TSNE_PERPLEXITY", "0")],
            [("N_CLUSTERS", "0")],
            [("ENABLE_SUMMARIES", "maybe")],
        ] {
            let err = lookup(&pairs).unwrap_err();
            assert!(matches!(err, AnalysisError::Config(_)), "{pairs:?}");
        }
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = lookup(&[("N_CLUSTERS", "  "), ("OPENAI_MODEL", "")]).unwrap();
        assert_eq!(config.cluster.n_clusters, None);
        assert_eq!(config.summary.model, "gpt-4o-mini");
    }
}
