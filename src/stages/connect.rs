use super::{push_segment, run_logged, Collaborators, Endpoint, RunContext, StagePayload};
use crate::adapters::{ToolOutput, PROBE_TIMEOUT};
use crate::error::{Result, VibeError};
use crate::types::{ArtifactBundle, ArtifactSlot};
use serde_json::Value;
use tracing::{info, warn};

pub const CONNECT_NAMESPACE: &str = "vibe-test-service";

/// Probed in this order; the first port that answers wins.
pub const CANDIDATE_PORTS: [u16; 3] = [80, 443, 5000];

/// First usable `spec.clusterIP` in a `kubectl get svc -o json` listing.
///
/// # Errors
///
/// `MalformedResponse` for text that is not JSON, `ConnectivityFailure` when
/// no service carries a cluster address.
pub fn cluster_ip_from_svc_json(text: &str) -> Result<String> {
    let listing: Value = serde_json::from_str(text)
        .map_err(|e| VibeError::MalformedResponse(format!("service listing is not JSON: {e}")))?;
    listing
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.pointer("/spec/clusterIP").and_then(Value::as_str))
        .map(str::trim)
        .find(|ip| !ip.is_empty() && *ip != "None")
        .map(str::to_string)
        .ok_or_else(|| VibeError::ConnectivityFailure("no service has a cluster IP".to_string()))
}

async fn discover(
    ctx: &RunContext,
    collab: &Collaborators,
    logs: &mut String,
) -> Result<Option<Endpoint>> {
    let tools = collab.tools.as_ref();
    let listing = run_logged(
        tools,
        &ctx.run_dir,
        &format!("kubectl -n {CONNECT_NAMESPACE} get svc -o json"),
        "connect:svc",
        logs,
    )
    .await
    .filter(ToolOutput::success)
    .ok_or_else(|| VibeError::ToolFailure("service lookup failed".to_string()))?;
    let host = cluster_ip_from_svc_json(&listing.output)?;

    tokio::time::sleep(ctx.settle_delay).await;

    for port in CANDIDATE_PORTS {
        let reached = collab.probe.probe(&host, port, PROBE_TIMEOUT).await?;
        push_segment(
            logs,
            "connect:probe",
            &format!("{host}:{port} {}", if reached { "open" } else { "closed" }),
        );
        if reached {
            return Ok(Some(Endpoint { host, port }));
        }
    }
    Ok(None)
}

pub(super) async fn run(
    bundle: ArtifactBundle,
    ctx: &RunContext,
    collab: &Collaborators,
) -> (ArtifactBundle, bool, StagePayload) {
    let tools = collab.tools.as_ref();
    let mut logs = String::new();
    let manifest = ctx.artifact_path(&bundle, ArtifactSlot::Manifest);

    let mut success = true;
    for (command, context) in [
        (
            format!("kubectl create namespace {CONNECT_NAMESPACE}"),
            "connect:namespace",
        ),
        (
            format!("kubectl -n {CONNECT_NAMESPACE} create -f {}", manifest.display()),
            "connect:create",
        ),
    ] {
        let ok = run_logged(tools, &ctx.run_dir, &command, context, &mut logs)
            .await
            .is_some_and(|out| out.success());
        success &= ok;
    }

    let endpoint = match discover(ctx, collab, &mut logs).await {
        Ok(endpoint) => endpoint,
        Err(err) => {
            warn!(error = %err, "service discovery failed");
            push_segment(&mut logs, "connect:svc", &err.to_string());
            None
        }
    };
    if endpoint.is_none() {
        success = false;
    }

    let deleted = run_logged(
        tools,
        &ctx.run_dir,
        &format!("kubectl delete namespace {CONNECT_NAMESPACE}"),
        "connect:delete",
        &mut logs,
    )
    .await
    .is_some_and(|out| out.success());
    success &= deleted;

    ctx.log.note("connect:*", &logs).await;
    match &endpoint {
        Some(endpoint) => info!(%endpoint, success, "connect finished"),
        None => info!(success, "connect finished without endpoint"),
    }
    (bundle.with_logs(logs), success, StagePayload::Endpoint(endpoint))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::cluster_ip_from_svc_json;
    use crate::error::VibeError;
    use crate::stages::{execute, Endpoint, StagePayload};
    use crate::test_support::{given_bundle, given_context, svc_listing, FakeCollaborators};
    use crate::types::{StageKind, StageOutcome};

    #[test]
    fn headless_services_are_skipped() {
        let text = r#"{"items": [
            {"spec": {"clusterIP": "None"}},
            {"spec": {"clusterIP": "10.96.0.12"}}
        ]}"#;
        assert_eq!(cluster_ip_from_svc_json(text).unwrap(), "10.96.0.12");
    }

    #[test]
    fn empty_listing_is_a_connectivity_failure() {
        let err = cluster_ip_from_svc_json(r#"{"items": []}"#).unwrap_err();
        assert!(matches!(err, VibeError::ConnectivityFailure(_)));
        assert!(matches!(
            cluster_ip_from_svc_json("nope").unwrap_err(),
            VibeError::MalformedResponse(_)
        ));
    }

    #[tokio::test]
    async fn ports_are_probed_in_order_until_one_answers() {
        let (ctx, _dir) = given_context();
        let fakes = FakeCollaborators::new()
            .with_tool_reply("kubectl -n vibe-test-service get svc", 0, &svc_listing("10.0.0.7"))
            .await
            .with_open_port(5000)
            .await;

        let report = execute(
            StageKind::Connect,
            given_bundle(),
            &ctx,
            &fakes.collaborators(),
            None,
        )
        .await;

        assert_eq!(report.outcome, StageOutcome::Passed);
        assert_eq!(
            report.payload,
            StagePayload::Endpoint(Some(Endpoint {
                host: "10.0.0.7".to_string(),
                port: 5000
            }))
        );
        assert_eq!(fakes.probed_ports().await, vec![80, 443, 5000]);
        assert_eq!(
            fakes.commands().await.last().map(String::as_str),
            Some("kubectl delete namespace vibe-test-service")
        );
    }

    #[tokio::test]
    async fn no_answering_port_fails_and_still_deletes() {
        let (ctx, _dir) = given_context();
        let fakes = FakeCollaborators::new()
            .with_tool_reply("kubectl -n vibe-test-service get svc", 0, &svc_listing("10.0.0.7"))
            .await;

        let report = execute(
            StageKind::Connect,
            given_bundle(),
            &ctx,
            &fakes.collaborators(),
            None,
        )
        .await;

        assert_eq!(report.outcome, StageOutcome::Failed);
        assert_eq!(report.payload, StagePayload::Endpoint(None));
        assert!(fakes
            .commands()
            .await
            .contains(&"kubectl delete namespace vibe-test-service".to_string()));
    }

    #[tokio::test]
    async fn failed_namespace_delete_fails_a_connected_stage() {
        let (ctx, _dir) = given_context();
        let fakes = FakeCollaborators::new()
            .with_tool_reply("kubectl -n vibe-test-service get svc", 0, &svc_listing("10.0.0.7"))
            .await
            .with_tool_reply("kubectl delete namespace", 1, "namespace stuck")
            .await
            .with_open_port(80)
            .await;

        let report = execute(
            StageKind::Connect,
            given_bundle(),
            &ctx,
            &fakes.collaborators(),
            None,
        )
        .await;

        assert_eq!(report.outcome, StageOutcome::Failed);
        assert!(matches!(report.payload, StagePayload::Endpoint(Some(_))));
        assert_eq!(fakes.probed_ports().await, vec![80]);
    }
}
