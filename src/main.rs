use clap::Parser;
use docatlas::pipeline::cluster::ClusteringMethod;
use docatlas::pipeline::similarity::SimilarityMetric;
use docatlas::{run_analysis, AnalysisConfig, OpenAiGenerator, TextGenerator};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

/// Cluster, link and visualize a directory of document embeddings
#[derive(Parser)]
#[command(name = "docatlas")]
#[command(version)]
#[command(about = "Analyze document embedding vectors and render an interactive atlas")]
struct Cli {
    /// Directory of *_vector.json files, or a JSON file holding an array of records
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Clustering method: centroid (k-means) or density (DBSCAN)
    #[arg(long)]
    method: Option<ClusteringMethod>,

    /// Number of k-means clusters (default: round(sqrt(n)))
    #[arg(short = 'k', long)]
    clusters: Option<usize>,

    /// Similarity metric: cosine, euclidean or pearson
    #[arg(long)]
    metric: Option<SimilarityMetric>,

    /// Minimum similarity for a graph link
    #[arg(long)]
    threshold: Option<f64>,

    /// t-SNE perplexity
    #[arg(long)]
    perplexity: Option<f64>,

    /// Output path of the results JSON
    #[arg(long)]
    results: Option<PathBuf>,

    /// Output path of the HTML visualization
    #[arg(long)]
    visualization: Option<PathBuf>,

    /// Directory for the per-cluster word clouds
    #[arg(long)]
    wordclouds: Option<PathBuf>,

    /// Skip LLM cluster summaries
    #[arg(long)]
    no_summaries: bool,

    /// Skip post-processing entirely
    #[arg(long)]
    skip: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(self, config: &mut AnalysisConfig) {
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(method) = self.method {
            config.cluster.method = method;
        }
        if self.clusters.is_some() {
            config.cluster.n_clusters = self.clusters;
        }
        if let Some(metric) = self.metric {
            config.similarity_metric = metric;
        }
        if let Some(threshold) = self.threshold {
            config.similarity_threshold = threshold;
        }
        if let Some(perplexity) = self.perplexity {
            config.projection.perplexity = perplexity;
        }
        if let Some(results) = self.results {
            config.output_results_path = results;
        }
        if let Some(visualization) = self.visualization {
            config.output_visualization_path = visualization;
        }
        if let Some(dir) = self.wordclouds {
            config.wordcloud_dir = dir;
        }
        if self.no_summaries {
            config.summary.enabled = false;
        }
        if self.skip {
            config.enable_post_processing = false;
        }
    }
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "analysis failed");
        eprintln!("\n❌ Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> docatlas::Result<()> {
    let mut config = AnalysisConfig::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    println!("DocAtlas\n");
    if !config.enable_post_processing {
        println!("Post-processing disabled, nothing to do.");
        return Ok(());
    }

    println!("Input: {}", config.input.display());
    println!(
        "   • Clustering: {} ({})",
        config.cluster.method,
        config
            .cluster
            .n_clusters
            .map_or_else(|| "auto k".to_string(), |k| format!("k = {k}"))
    );
    println!(
        "   • Similarity: {} ≥ {}",
        config.similarity_metric, config.similarity_threshold
    );
    println!("   • Perplexity: {}", config.projection.perplexity);

    let generator = config
        .summary
        .enabled
        .then(|| OpenAiGenerator::new(&config.summary));
    match &generator {
        Some(g) => println!("   • Summaries: {}", g.name()),
        None => println!("   • Summaries: disabled"),
    }

    println!("\n🟪 Running analysis...");
    let Some(report) = run_analysis(
        &config,
        generator.as_ref().map(|g| g as &dyn TextGenerator),
    )
    .await?
    else {
        return Ok(());
    };

    println!("\n📊 Results:");
    println!("   • Documents: {}", report.documents);
    println!("   • Clusters: {}", report.clusters);
    println!("   • Unclustered: {}", report.unclustered);
    println!("   • Graph links: {}", report.links);
    println!("   • Summaries generated: {}", report.summaries_generated);

    println!("\n✅ Wrote {}", report.results_path.display());
    println!("✅ Wrote {}", report.visualization_path.display());
    Ok(())
}
