use super::transition::table_edges;
use crate::adapters::ToolRunner;
use crate::error::{Result, VibeError};
use crate::types::{Stage, TraceEntry};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn esc(text: &str) -> String {
    text.replace('"', "\\\"")
}

/// DOT rendering of the transition table with the taken edges labelled by
/// the steps that took them.
#[must_use]
pub fn render_dot(trace: &[TraceEntry], resume: Stage) -> String {
    let taken = trace
        .iter()
        .map(|entry| ((entry.from, entry.to), entry.step))
        .into_group_map();

    let mut lines = vec![
        "digraph FSM {".to_string(),
        "  rankdir=LR;".to_string(),
        "  nodesep=0.6; ranksep=0.5;".to_string(),
        "  node [shape=circle, fontsize=14, fontname=\"Times-Italic\", width=0.8, height=0.8];"
            .to_string(),
        "  edge [fontname=\"Times-Italic\", fontsize=12, arrowsize=0.8];".to_string(),
    ];

    lines.extend(Stage::ALL.into_iter().map(|stage| {
        if stage.is_terminal() {
            format!("  \"{}\" [peripheries=2];", esc(stage.as_str()))
        } else {
            format!("  \"{}\";", esc(stage.as_str()))
        }
    }));

    lines.extend(
        table_edges(resume)
            .into_iter()
            .map(|(from, _, to)| (from, to))
            .unique()
            .filter(|edge| !taken.contains_key(edge))
            .map(|(from, to)| {
                format!(
                    "  \"{}\" -> \"{}\" [color=gray50, label=\"\"];",
                    esc(from.as_str()),
                    esc(to.as_str())
                )
            }),
    );

    let taken = taken
        .into_iter()
        .sorted_by_key(|(_, steps)| steps.iter().min().copied());
    lines.extend(taken.map(|((from, to), steps)| {
        let label = steps.iter().sorted().join(",");
        format!(
            "  \"{}\" -> \"{}\" [penwidth=1.8, color=black, label=\"{}\"];",
            esc(from.as_str()),
            esc(to.as_str()),
            esc(&label)
        )
    }));

    lines.push("}".to_string());
    lines.join("\n")
}

/// Writes `<dir>/<date>_dot` and converts it to SVG with `dot`.
///
/// Returns the DOT path. A failed conversion is only logged.
///
/// # Errors
///
/// Returns an I/O error when the DOT file cannot be written.
pub async fn write_graph(
    tools: &dyn ToolRunner,
    dir: &Path,
    date: &str,
    trace: &[TraceEntry],
    resume: Stage,
) -> Result<PathBuf> {
    let path = dir.join(format!("{date}_dot"));
    tokio::fs::write(&path, render_dot(trace, resume)).await?;

    let command = format!("dot -Tsvg {0} -o {0}.svg", path.display());
    let converted = tools
        .run(&command, dir)
        .await
        .and_then(|out| {
            if out.success() {
                Ok(())
            } else {
                Err(VibeError::ToolFailure(out.output))
            }
        });
    match converted {
        Ok(()) => info!(path = %path.display(), "SVG graph written"),
        Err(err) => warn!(error = %err, "graph not generated"),
    }
    Ok(path)
}
