//! docatlas: turn document embedding vectors into clusters, a similarity
//! graph, a 2D layout, optional LLM cluster summaries, a results JSON and a
//! self-contained HTML visualization.

pub mod config;
pub mod error;
pub mod graph;
pub mod pipeline;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, DataError, Result, ServiceError};
pub use pipeline::summarize::{OpenAiGenerator, TextGenerator};
pub use pipeline::{analyze, run_analysis, Analysis, RunReport};
