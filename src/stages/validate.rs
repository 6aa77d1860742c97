use super::{push_segment, Collaborators, StagePayload};
use crate::adapters::PortFuture;
use crate::manifest::Manifest;
use crate::types::ArtifactBundle;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub passed: bool,
    pub findings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn from_findings(findings: Vec<String>) -> Self {
        Self {
            passed: findings.is_empty(),
            findings,
        }
    }
}

/// Inspects built artifacts before they reach the cluster.
pub trait ArtifactValidator: Send + Sync {
    fn validate<'a>(&'a self, bundle: &'a ArtifactBundle) -> PortFuture<'a, ValidationReport>;
}

/// Offline checks on the bundle contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticArtifactValidator;

impl StaticArtifactValidator {
    #[must_use]
    pub fn findings(bundle: &ArtifactBundle) -> Vec<String> {
        let mut findings = Vec::new();

        match Manifest::parse(&bundle.manifest.content) {
            Ok(manifest) => {
                for kind in ["Deployment", "Service"] {
                    if !manifest.has_kind(kind) {
                        findings.push(format!("{} has no {kind} document", bundle.manifest.file));
                    }
                }
            }
            Err(err) => findings.push(format!("{}: {err}", bundle.manifest.file)),
        }

        let has_from = bundle
            .container
            .content
            .lines()
            .map(str::trim_start)
            .any(|line| {
                line.get(..5)
                    .is_some_and(|head| head.eq_ignore_ascii_case("FROM "))
            });
        if !has_from {
            findings.push(format!("{} has no FROM line", bundle.container.file));
        }

        if bundle.code.is_blank() {
            findings.push(format!("{} is empty", bundle.code.file));
        }
        findings
    }
}

impl ArtifactValidator for StaticArtifactValidator {
    fn validate<'a>(&'a self, bundle: &'a ArtifactBundle) -> PortFuture<'a, ValidationReport> {
        Box::pin(async move { Ok(ValidationReport::from_findings(Self::findings(bundle))) })
    }
}

pub(super) async fn run(
    bundle: ArtifactBundle,
    collab: &Collaborators,
) -> (ArtifactBundle, bool, StagePayload) {
    let mut logs = String::new();
    let report = match collab.validator.validate(&bundle).await {
        Ok(report) => report,
        Err(err) => ValidationReport {
            passed: false,
            findings: vec![err.to_string()],
        },
    };
    if !report.findings.is_empty() {
        push_segment(&mut logs, "validate", &report.findings.join("\n"));
    }
    info!(passed = report.passed, findings = report.findings.len(), "validation finished");
    (
        bundle.with_logs(logs),
        report.passed,
        StagePayload::Findings(report.findings),
    )
}
