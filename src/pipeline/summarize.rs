// pipeline/summarize.rs
// Optional per-cluster narratives from a text-generation backend

use crate::error::ServiceError;
use crate::pipeline::cluster::ClusterAssignment;
use crate::pipeline::ingest::{Document, DocumentStore};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use openai::chat::{ChatCompletion, ChatCompletionMessage, ChatCompletionMessageRole};
use openai::Credentials;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Narrative recorded when no summary could be produced for a cluster
pub const PLACEHOLDER_NARRATIVE: &str = "Summary unavailable.";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

const INSTRUCTION: &str = "You are analyzing a cluster of academic documents. Based on the \
following titles and summaries, provide a concise description of what this cluster represents. \
What is the common theme or research area?";

const CLOSING: &str =
    "Provide a 2-3 sentence summary describing the common theme of these documents:";

/// Configuration for cluster summarization
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub model: String,
    /// OpenAI-compatible endpoint; `None` uses the public OpenAI API
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_prompt_chars: usize,
    /// Clusters summarized at once
    pub concurrency: usize,
    pub max_completion_tokens: u32,
    pub temperature: f32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            timeout: Duration::from_secs(120),
            max_prompt_chars: 5000,
            concurrency: num_cpus::get().clamp(2, 8),
            max_completion_tokens: 300,
            temperature: 0.2,
        }
    }
}

/// Something that turns a prompt into text.
///
/// Implementations report failures as [`ServiceError`]; the summarizer
/// never lets them abort a run.
pub trait TextGenerator: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, ServiceError>>;

    fn name(&self) -> &str;
}

/// Chat-completions backend for any OpenAI-compatible server
pub struct OpenAiGenerator {
    credentials: Credentials,
    model: String,
    max_completion_tokens: u32,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(config: &SummaryConfig) -> Self {
        let api_key = config.api_key.clone().unwrap_or_default();
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            credentials: Credentials::new(api_key, base_url),
            model: config.model.clone(),
            max_completion_tokens: config.max_completion_tokens,
            temperature: config.temperature,
        }
    }
}

impl TextGenerator for OpenAiGenerator {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, ServiceError>> {
        Box::pin(async move {
            let messages = vec![ChatCompletionMessage {
                role: ChatCompletionMessageRole::User,
                content: Some(prompt.to_string()),
                name: None,
                function_call: None,
                tool_call_id: None,
                tool_calls: None,
            }];

            let response = ChatCompletion::builder(&self.model, messages)
                .credentials(self.credentials.clone())
                .max_completion_tokens(self.max_completion_tokens)
                .temperature(self.temperature)
                .create()
                .await
                .map_err(|e| ServiceError::Unavailable(e.to_string()))?;

            response
                .choices
                .first()
                .and_then(|choice| choice.message.content.clone())
                .ok_or_else(|| ServiceError::MalformedResponse("no response content".to_string()))
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Summary of one cluster as stored in the results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub member_count: usize,
    pub wordcloud: Option<PathBuf>,
    pub narrative: String,
    /// `false` when `narrative` is the placeholder
    pub generated: bool,
}

/// Build the prompt for a cluster: titles, then summaries, the combined
/// text cut to `max_chars` characters.
pub fn cluster_prompt(members: &[&Document], max_chars: usize) -> String {
    let titles: Vec<String> = members.iter().map(|d| format!("- {}", d.title)).collect();
    let summaries: Vec<&str> = members.iter().map(|d| d.summary.as_str()).collect();

    let combined = format!(
        "DOCUMENT TITLES:\n{}\n\nDOCUMENT SUMMARIES:\n{}",
        titles.join("\n"),
        summaries.join("\n\n")
    );
    let truncated: String = combined.chars().take(max_chars).collect();

    format!("{INSTRUCTION}\n\n{truncated}\n\n{CLOSING}")
}

/// Ask `generator` to describe one cluster, bounded by `config.timeout`.
pub async fn summarize(
    generator: &dyn TextGenerator,
    members: &[&Document],
    config: &SummaryConfig,
) -> Result<String, ServiceError> {
    let prompt = cluster_prompt(members, config.max_prompt_chars);
    debug!(backend = generator.name(), chars = prompt.len(), "requesting cluster summary");

    let text = tokio::time::timeout(config.timeout, generator.generate(&prompt))
        .await
        .map_err(|_| ServiceError::Timeout(config.timeout))??;

    let text = text.trim();
    if text.is_empty() {
        return Err(ServiceError::MalformedResponse("empty response".to_string()));
    }
    Ok(text.to_string())
}

/// Summarize every non-noise cluster.
///
/// Clusters run concurrently up to `config.concurrency`. A failed or timed
/// out cluster gets the placeholder narrative and the rest carry on.
pub async fn summarize_clusters(
    store: &DocumentStore,
    assignment: &ClusterAssignment,
    generator: Option<&dyn TextGenerator>,
    wordclouds: &BTreeMap<u32, PathBuf>,
    config: &SummaryConfig,
) -> BTreeMap<u32, ClusterSummary> {
    let documents = store.documents();
    let clusters = assignment.clusters();

    let generator = match generator {
        Some(g) if config.enabled => g,
        _ => {
            info!(clusters = clusters.len(), "summaries disabled, using placeholders");
            return clusters
                .into_iter()
                .map(|cluster| {
                    let summary = placeholder(assignment.members(cluster).len(), wordclouds.get(&cluster));
                    (cluster, summary)
                })
                .collect();
        }
    };

    let outcomes: Vec<(u32, usize, Result<String, ServiceError>)> = stream::iter(clusters)
        .map(|cluster| async move {
            let members: Vec<&Document> = assignment
                .members(cluster)
                .into_iter()
                .map(|idx| &documents[idx])
                .collect();
            let result = summarize(generator, &members, config).await;
            (cluster, members.len(), result)
        })
        .buffered(config.concurrency.max(1))
        .collect()
        .await;

    let mut summaries = BTreeMap::new();
    let mut generated = 0;
    for (cluster, member_count, result) in outcomes {
        let summary = match result {
            Ok(narrative) => {
                generated += 1;
                ClusterSummary {
                    member_count,
                    wordcloud: wordclouds.get(&cluster).cloned(),
                    narrative,
                    generated: true,
                }
            }
            Err(e) => {
                warn!(cluster, backend = generator.name(), error = %e, "cluster summary failed");
                placeholder(member_count, wordclouds.get(&cluster))
            }
        };
        summaries.insert(cluster, summary);
    }

    info!(clusters = summaries.len(), generated, "cluster summaries complete");
    summaries
}

fn placeholder(member_count: usize, wordcloud: Option<&PathBuf>) -> ClusterSummary {
    ClusterSummary {
        member_count,
        wordcloud: wordcloud.cloned(),
        narrative: PLACEHOLDER_NARRATIVE.to_string(),
        generated: false,
    }
}
