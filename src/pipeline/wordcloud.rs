// pipeline/wordcloud.rs
// Per-cluster term frequencies rendered as SVG word clouds

use crate::error::{AnalysisError, Result};
use crate::pipeline::cluster::ClusterAssignment;
use crate::pipeline::ingest::DocumentStore;
use crate::pipeline::render::PALETTE;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Layout parameters of a word cloud image
#[derive(Debug, Clone)]
pub struct WordCloudStyle {
    pub width: f64,
    pub height: f64,
    pub max_words: usize,
    pub min_font_size: f64,
    pub max_font_size: f64,
    /// 0 ranks words only by order, 1 scales font linearly with frequency
    pub relative_scaling: f64,
    pub background: String,
}

impl Default for WordCloudStyle {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 400.0,
            max_words: 100,
            min_font_size: 10.0,
            max_font_size: 72.0,
            relative_scaling: 0.5,
            background: "white".to_string(),
        }
    }
}

pub fn wordcloud_file_name(cluster: u32) -> String {
    format!("cluster_{cluster}_wordcloud.svg")
}

/// Render one word cloud per cluster into `dir`.
///
/// Noise documents are ignored and clusters without usable text are skipped.
pub fn write_cluster_wordclouds(
    store: &DocumentStore,
    assignment: &ClusterAssignment,
    dir: &Path,
    style: &WordCloudStyle,
) -> Result<BTreeMap<u32, PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| AnalysisError::io(dir, e))?;

    let documents = store.documents();
    let mut written = BTreeMap::new();

    for cluster in assignment.clusters() {
        let members = assignment.members(cluster);
        let texts = members.iter().flat_map(|&idx| {
            let doc = &documents[idx];
            [doc.title.as_str(), doc.summary.as_str()]
        });

        let terms = term_frequencies(texts);
        if terms.is_empty() {
            debug!(cluster, "no text to build a word cloud from, skipping");
            continue;
        }

        let path = dir.join(wordcloud_file_name(cluster));
        fs::write(&path, render_svg(&terms, style)).map_err(|e| AnalysisError::io(&path, e))?;
        info!(cluster, terms = terms.len(), path = %path.display(), "word cloud written");
        written.insert(cluster, path);
    }

    Ok(written)
}

/// Count keywords across texts, most frequent first (ties alphabetical).
pub fn term_frequencies<'a>(texts: impl IntoIterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for keyword in extract_keywords(text) {
            *counts.entry(keyword).or_insert(0) += 1;
        }
    }

    let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Extract keywords from text
pub fn extract_keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2) // Skip very short words
        .map(|w| w.to_lowercase())
        .filter(|w| !is_stopword(w) && !w.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// Check if word is a stopword
fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "the"
            | "and"
            | "for"
            | "that"
            | "this"
            | "with"
            | "from"
            | "have"
            | "has"
            | "are"
            | "was"
            | "were"
            | "been"
            | "its"
            | "into"
            | "these"
            | "those"
            | "their"
            | "which"
            | "also"
            | "such"
            | "can"
            | "than"
            | "not"
            | "but"
            | "our"
            | "using"
            | "based"
            | "between"
            | "through"
            | "paper"
            | "study"
    )
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Rect {
    fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// Render terms as an SVG word cloud.
///
/// Words are placed largest first along an outward spiral from the centre;
/// a word that finds no free spot is dropped.
pub fn render_svg(terms: &[(String, usize)], style: &WordCloudStyle) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="100%" height="100%" fill="{bg}"/>"#,
        w = style.width,
        h = style.height,
        bg = escape_xml(&style.background),
    );

    let max_count = terms.first().map(|(_, c)| *c).unwrap_or(1).max(1) as f64;
    let mut placed: Vec<Rect> = Vec::new();

    for (rank, (word, count)) in terms.iter().take(style.max_words).enumerate() {
        let ratio = *count as f64 / max_count;
        let scale = style.relative_scaling * ratio + (1.0 - style.relative_scaling) * ratio.sqrt();
        let font = style.min_font_size + (style.max_font_size - style.min_font_size) * scale;
        let w = font * 0.6 * word.chars().count() as f64;
        let h = font;

        if let Some(rect) = find_spot(w, h, style, &placed) {
            svg.push_str(&format!(
                r#"<text x="{x:.1}" y="{y:.1}" font-size="{font:.1}" font-family="sans-serif" fill="{color}" text-anchor="middle" dominant-baseline="central">{word}</text>"#,
                x = rect.x + rect.w / 2.0,
                y = rect.y + rect.h / 2.0,
                color = PALETTE[rank % PALETTE.len()],
                word = escape_xml(word),
            ));
            placed.push(rect);
        }
    }

    svg.push_str("</svg>");
    svg
}

fn find_spot(w: f64, h: f64, style: &WordCloudStyle, placed: &[Rect]) -> Option<Rect> {
    let (cx, cy) = (style.width / 2.0, style.height / 2.0);
    let aspect = style.width / style.height;

    for step in 0..4000 {
        let angle = step as f64 * 0.1;
        let radius = angle * 1.5;
        let rect = Rect {
            x: cx + radius * angle.cos() * aspect - w / 2.0,
            y: cy + radius * angle.sin() - h / 2.0,
            w,
            h,
        };
        let inside = rect.x >= 0.0
            && rect.y >= 0.0
            && rect.x + w <= style.width
            && rect.y + h <= style.height;
        if inside && placed.iter().all(|other| !rect.overlaps(other)) {
            return Some(rect);
        }
    }
    None
}

pub(crate) fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
