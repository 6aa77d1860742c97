use super::{run_sequence, Collaborators, RunContext, StagePayload};
use crate::types::{ArtifactBundle, ArtifactSlot};
use tracing::info;

pub const DEPLOY_NAMESPACE: &str = "vibe-test-deploy";

pub(super) async fn run(
    bundle: ArtifactBundle,
    ctx: &RunContext,
    collab: &Collaborators,
) -> (ArtifactBundle, bool, StagePayload) {
    let manifest = ctx.artifact_path(&bundle, ArtifactSlot::Manifest);
    let commands = [
        (
            format!("kubectl create namespace {DEPLOY_NAMESPACE}"),
            "deploy:namespace",
        ),
        (
            format!(
                "kubectl -n {DEPLOY_NAMESPACE} create -f {}",
                manifest.display()
            ),
            "deploy:create",
        ),
        (
            format!("kubectl delete namespace {DEPLOY_NAMESPACE}"),
            "deploy:delete",
        ),
    ];

    let mut logs = String::new();
    // The namespace is deleted even when the apply fails.
    let success = run_sequence(
        collab.tools.as_ref(),
        &ctx.run_dir,
        &commands,
        false,
        &mut logs,
    )
    .await;
    ctx.log.note("deploy:*", &logs).await;
    info!(success, "deploy finished");
    (bundle.with_logs(logs), success, StagePayload::Nothing)
}
