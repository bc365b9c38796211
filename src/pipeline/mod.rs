// Pipeline module declarations
// Each phase is a separate module, run in order by `run_analysis`

pub mod ingest;     // Phase 1: Load and validate embedding records
pub mod cluster;    // Phase 2: k-means or DBSCAN labels
pub mod similarity; // Phase 3: Pairwise similarity matrix
pub mod project;    // Phase 5: t-SNE layout (phase 4 is graph::builder)
pub mod wordcloud;  // Phase 6: Per-cluster word clouds
pub mod summarize;  // Phase 7: LLM cluster narratives
pub mod export;     // Phase 8: Results JSON
pub mod render;     // Phase 9: HTML visualization

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::graph::builder::build_graph;
use crate::graph::RelationshipGraph;
use cluster::{ClusterAssignment, ClusteringMethod};
use export::AnalysisResults;
use ingest::{DocumentStore, InputSource};
use project::Projection;
use similarity::SimilarityMatrix;
use std::collections::BTreeMap;
use std::path::PathBuf;
use summarize::{ClusterSummary, TextGenerator};
use tracing::info;

/// Derived state of one run
#[derive(Debug, Clone)]
pub struct Analysis {
    pub store: DocumentStore,
    pub method: ClusteringMethod,
    pub assignment: ClusterAssignment,
    pub similarity: SimilarityMatrix,
    pub graph: RelationshipGraph,
    pub projection: Projection,
    pub wordclouds: BTreeMap<u32, PathBuf>,
    pub summaries: BTreeMap<u32, ClusterSummary>,
}

/// What a finished run wrote
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub documents: usize,
    pub clusters: usize,
    pub unclustered: usize,
    pub links: usize,
    pub summaries_generated: usize,
    pub results_path: PathBuf,
    pub visualization_path: PathBuf,
}

/// Run every analysis phase over an already loaded document set.
///
/// Word clouds are written to `config.wordcloud_dir` as a side effect.
pub async fn analyze(
    store: DocumentStore,
    config: &AnalysisConfig,
    generator: Option<&dyn TextGenerator>,
) -> Result<Analysis> {
    config.validate()?;

    let assignment = cluster::fit(&store, &config.cluster)?;
    let similarity = similarity::compute(&store, config.similarity_metric);
    let graph = build_graph(&store, &assignment, &similarity, config.similarity_threshold);
    let projection = project::project(&store, &config.projection);

    let wordclouds = wordcloud::write_cluster_wordclouds(
        &store,
        &assignment,
        &config.wordcloud_dir,
        &config.wordcloud_style,
    )?;
    let summaries =
        summarize::summarize_clusters(&store, &assignment, generator, &wordclouds, &config.summary)
            .await;

    Ok(Analysis {
        store,
        method: config.cluster.method,
        assignment,
        similarity,
        graph,
        projection,
        wordclouds,
        summaries,
    })
}

/// Load `config.input`, analyze it and write the results JSON and the
/// HTML visualization.
///
/// Returns `None` without touching the filesystem when post-processing
/// is disabled.
pub async fn run_analysis(
    config: &AnalysisConfig,
    generator: Option<&dyn TextGenerator>,
) -> Result<Option<RunReport>> {
    config.validate()?;
    if !config.enable_post_processing {
        info!("post-processing disabled, skipping analysis");
        return Ok(None);
    }

    let store = ingest::ingest(InputSource::from_path(&config.input))?;
    let analysis = analyze(store, config, generator).await?;

    let results = AnalysisResults::from_analysis(&analysis);
    results.save(&config.output_results_path)?;

    let html = render::render(&analysis.projection, &analysis.graph, &analysis.assignment);
    render::write_visualization(&config.output_visualization_path, &html)?;

    info!(
        results = %config.output_results_path.display(),
        visualization = %config.output_visualization_path.display(),
        "analysis complete"
    );

    Ok(Some(RunReport {
        documents: analysis.store.len(),
        clusters: analysis.assignment.cluster_count(),
        unclustered: analysis.assignment.unclustered().len(),
        links: analysis.graph.links.len(),
        summaries_generated: analysis.summaries.values().filter(|s| s.generated).count(),
        results_path: config.output_results_path.clone(),
        visualization_path: config.output_visualization_path.clone(),
    }))
}
