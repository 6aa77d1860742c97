use super::{push_segment, run_sequence, Collaborators, RunContext, StagePayload};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::runlog::context;
use crate::types::{ArtifactBundle, ArtifactSlot};
use std::path::Path;
use tracing::{info, warn};

/// Build, tag and push commands for the application image.
#[must_use]
pub fn build_commands(image_repo: &str) -> Vec<String> {
    vec![
        "docker build -t myapp .".to_string(),
        format!("docker tag myapp:latest {image_repo}/myapp:latest"),
        format!("docker push {image_repo}/myapp:latest"),
    ]
}

async fn write_sources(bundle: &ArtifactBundle, run_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(run_dir).await?;
    for slot in [
        ArtifactSlot::Code,
        ArtifactSlot::Container,
        ArtifactSlot::Requirements,
    ] {
        let artifact = bundle.slot(slot);
        tokio::fs::write(run_dir.join(&artifact.file), &artifact.content).await?;
    }
    Ok(())
}

/// Canonical manifest text when it parsed, the raw text otherwise.
fn manifest_text(bundle: &ArtifactBundle, parsed: Option<&Manifest>) -> String {
    parsed
        .and_then(|manifest| manifest.to_yaml().ok())
        .unwrap_or_else(|| bundle.manifest.content.clone())
}

pub(super) async fn run(
    bundle: ArtifactBundle,
    ctx: &RunContext,
    collab: &Collaborators,
) -> (ArtifactBundle, bool, StagePayload) {
    let mut logs = String::new();

    let parsed = match Manifest::parse(&bundle.manifest.content) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            warn!(error = %err, "manifest does not parse");
            push_segment(&mut logs, context::BUILD, &err.to_string());
            None
        }
    };
    let mut success = parsed.is_some();

    if bundle.code.is_blank() || bundle.container.is_blank() {
        push_segment(&mut logs, context::BUILD, "code or container recipe is empty");
        success = false;
    } else if let Err(err) = write_sources(&bundle, &ctx.run_dir).await {
        push_segment(&mut logs, context::BUILD, &err.to_string());
        success = false;
    } else {
        let commands: Vec<(String, &str)> = build_commands(&ctx.image_repo)
            .into_iter()
            .map(|command| (command, context::BUILD))
            .collect();
        if !run_sequence(collab.tools.as_ref(), &ctx.run_dir, &commands, true, &mut logs).await {
            success = false;
        }
    }

    let manifest_path = ctx.artifact_path(&bundle, ArtifactSlot::Manifest);
    if let Err(err) =
        tokio::fs::write(&manifest_path, manifest_text(&bundle, parsed.as_ref())).await
    {
        push_segment(&mut logs, context::BUILD, &err.to_string());
        success = false;
    }

    ctx.log.note(context::BUILD, &logs).await;
    info!(success, "build finished");
    (bundle.with_logs(logs), success, StagePayload::Nothing)
}
