// pipeline/render.rs
// Self-contained interactive HTML view of a run

use crate::error::{AnalysisError, Result};
use crate::graph::RelationshipGraph;
use crate::pipeline::cluster::{ClusterAssignment, ClusterLabel};
use crate::pipeline::project::Projection;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Cluster colours, indexed by cluster number modulo the length
pub const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

const TEMPLATE: &str = include_str!("../../assets/visualization.html");
const PAGE_TITLE: &str = "Document Analysis";

/// Render the scatter plot and network view into one HTML page.
///
/// All data is inlined as JSON; the page needs no network access.
pub fn render(
    projection: &Projection,
    graph: &RelationshipGraph,
    assignment: &ClusterAssignment,
) -> String {
    let label_of = |id: &str| assignment.label_of(id).unwrap_or(ClusterLabel::Noise);
    let titles: HashMap<&str, (&str, &str)> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), (n.title.as_str(), n.author.as_str())))
        .collect();

    let points: Vec<_> = projection
        .iter()
        .map(|(id, [x, y])| {
            let (title, author) = titles.get(id).copied().unwrap_or(("", ""));
            json!({
                "id": id,
                "title": title,
                "author": author,
                "cluster": i64::from(label_of(id)),
                "x": x,
                "y": y,
            })
        })
        .collect();

    let index: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let nodes: Vec<_> = graph
        .nodes
        .iter()
        .map(|n| {
            json!({
                "id": n.id,
                "title": n.title,
                "cluster": i64::from(n.cluster),
                "degree": graph.degree(&n.id),
            })
        })
        .collect();

    let links: Vec<_> = graph
        .links
        .iter()
        .filter_map(|l| {
            let source = *index.get(l.source.as_str())?;
            let target = *index.get(l.target.as_str())?;
            Some(json!({ "source": source, "target": target, "weight": l.weight }))
        })
        .collect();

    let data = json!({
        "threshold": graph.threshold,
        "clusters": assignment.clusters(),
        "has_noise": assignment.labels().iter().any(ClusterLabel::is_noise),
        "points": points,
        "nodes": nodes,
        "links": links,
    });

    let html = TEMPLATE
        .replace("__TITLE__", PAGE_TITLE)
        .replace("__PALETTE__", &json!(PALETTE).to_string())
        .replace("__DATA__", &script_safe(&data.to_string()));

    info!(
        points = projection.len(),
        links = graph.links.len(),
        bytes = html.len(),
        "visualization rendered"
    );
    html
}

/// Write the rendered page, creating the parent directory if needed.
pub fn write_visualization(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AnalysisError::io(parent, e))?;
    }
    fs::write(path, html).map_err(|e| AnalysisError::io(path, e))?;
    info!(path = %path.display(), "visualization written");
    Ok(())
}

/// Escape JSON so it can sit inside a `<script>` element.
///
/// The replacements are valid JSON string escapes, and these characters
/// never appear outside strings in serialized JSON.
fn script_safe(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}
