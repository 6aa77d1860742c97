use super::{push_segment, run_sequence, Collaborators, RunContext, StagePayload};
use crate::error::Result;
use crate::types::{ArtifactBundle, ArtifactSlot};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const CHART_DIR: &str = "genchart";
pub const CHART_ARCHIVE: &str = "genchart-0.1.0.tgz";
const LOG_CONTEXT: &str = "postprocess:*";

/// `Chart.yaml` contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub api_version: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub chart_type: String,
    pub version: String,
    pub app_version: String,
}

impl ChartMetadata {
    #[must_use]
    pub fn for_intent(intent: &str) -> Self {
        Self {
            api_version: "v2".to_string(),
            name: CHART_DIR.to_string(),
            description: format!("Generated chart for intent: {intent}"),
            chart_type: "application".to_string(),
            version: "0.1.0".to_string(),
            app_version: "1.16.0".to_string(),
        }
    }
}

async fn write_chart(bundle: &ArtifactBundle, ctx: &RunContext, chart_dir: &Path) -> Result<()> {
    let templates = chart_dir.join("templates");
    tokio::fs::create_dir_all(&templates).await?;
    tokio::fs::copy(
        ctx.artifact_path(bundle, ArtifactSlot::Manifest),
        templates.join(&bundle.manifest.file),
    )
    .await?;
    tokio::fs::write(chart_dir.join("values.yaml"), "").await?;
    let metadata = serde_yaml::to_string(&ChartMetadata::for_intent(&ctx.intent))?;
    tokio::fs::write(chart_dir.join("Chart.yaml"), metadata).await?;
    Ok(())
}

/// The packaged archive leaves the chart directory for the run's parent,
/// the output root shared by every run of the same model.
fn archive_destination(run_dir: &Path) -> PathBuf {
    run_dir.parent().unwrap_or(run_dir).join(CHART_ARCHIVE)
}

pub(super) async fn run(
    bundle: ArtifactBundle,
    ctx: &RunContext,
    collab: &Collaborators,
) -> (ArtifactBundle, bool, StagePayload) {
    let chart_dir = ctx.run_dir.join(CHART_DIR);
    let mut logs = String::new();

    let success = match write_chart(&bundle, ctx, &chart_dir).await {
        Ok(()) => {
            let commands = [
                ("helm lint".to_string(), LOG_CONTEXT),
                ("helm package .".to_string(), LOG_CONTEXT),
                (format!("mv {CHART_ARCHIVE} ../.."), LOG_CONTEXT),
            ];
            run_sequence(collab.tools.as_ref(), &chart_dir, &commands, true, &mut logs).await
        }
        Err(err) => {
            push_segment(&mut logs, LOG_CONTEXT, &err.to_string());
            false
        }
    };

    ctx.log.note(LOG_CONTEXT, &logs).await;
    let archive = success.then(|| archive_destination(&ctx.run_dir));
    info!(success, "chart finished");
    (bundle.with_logs(logs), success, StagePayload::Chart(archive))
}
