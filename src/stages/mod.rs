//! Stage handlers.
//!
//! Every handler takes the current bundle by value and returns a new one
//! together with its outcome. Collaborator errors never escape a handler:
//! they become a failed outcome with the error text in the bundle logs.

mod build;
mod chart;
mod connect;
mod deploy;
mod fix;
mod generate;
mod validate;

use crate::adapters::{GenerationService, PortProbe, ToolOutput, ToolRunner};
use crate::runlog::{internal_segment, RunLog};
use crate::timing::elapsed_ms;
use crate::types::{ArtifactBundle, ArtifactSlot, Stage, StageKind, StageOutcome};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use build::build_commands;
pub use chart::{ChartMetadata, CHART_ARCHIVE};
pub use connect::{cluster_ip_from_svc_json, CANDIDATE_PORTS, CONNECT_NAMESPACE};
pub use deploy::DEPLOY_NAMESPACE;
pub use fix::{fix_prompt, MIN_REPLACEMENT_LEN};
pub use generate::generation_prompt;
pub use validate::{ArtifactValidator, StaticArtifactValidator, ValidationReport};

/// External collaborators shared by all stages.
#[derive(Clone)]
pub struct Collaborators {
    pub tools: Arc<dyn ToolRunner>,
    pub generation: Arc<dyn GenerationService>,
    pub probe: Arc<dyn PortProbe>,
    pub validator: Arc<dyn ArtifactValidator>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Read-only context of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub intent: String,
    pub model: String,
    pub run_dir: PathBuf,
    pub image_repo: String,
    pub settle_delay: Duration,
    pub log: RunLog,
}

impl RunContext {
    #[must_use]
    pub fn artifact_path(&self, bundle: &ArtifactBundle, slot: ArtifactSlot) -> PathBuf {
        self.run_dir.join(&bundle.slot(slot).file)
    }
}

/// What FIX is repairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixContext {
    /// The non-FIX stage whose failure started this repair cycle.
    pub failed_stage: Stage,
    /// The stage applied immediately before this FIX and its outcome.
    pub preceding: Stage,
    pub result: StageOutcome,
    pub logs: String,
}

impl FixContext {
    /// Context taken from the stamp of the incoming bundle.
    #[must_use]
    pub fn from_bundle(bundle: &ArtifactBundle) -> Self {
        let preceding = bundle.stage.unwrap_or(Stage::Generate);
        Self {
            failed_stage: preceding,
            preceding,
            result: bundle.result,
            logs: bundle.logs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactChange {
    pub slot: ArtifactSlot,
    pub before: String,
    pub after: String,
}

/// Stage-specific result data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StagePayload {
    #[default]
    Nothing,
    Endpoint(Option<Endpoint>),
    Chart(Option<PathBuf>),
    Findings(Vec<String>),
    Changes(Vec<ArtifactChange>),
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub bundle: ArtifactBundle,
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
    pub payload: StagePayload,
}

/// Applies one stage.
pub async fn execute(
    kind: StageKind,
    bundle: ArtifactBundle,
    ctx: &RunContext,
    collab: &Collaborators,
    fix: Option<&FixContext>,
) -> StageReport {
    let start = Instant::now();
    ctx.log.note(crate::runlog::context::PHASE, kind.stage().as_str()).await;

    let (bundle, success, payload) = match kind {
        StageKind::Generate => generate::run(bundle, ctx, collab).await,
        StageKind::Build => build::run(bundle, ctx, collab).await,
        StageKind::Validate => validate::run(bundle, collab).await,
        StageKind::Deploy => deploy::run(bundle, ctx, collab).await,
        StageKind::Connect => connect::run(bundle, ctx, collab).await,
        StageKind::Chart => chart::run(bundle, ctx, collab).await,
        StageKind::Fix => {
            let fix_ctx = fix.cloned().unwrap_or_else(|| FixContext::from_bundle(&bundle));
            fix::run(bundle, ctx, collab, &fix_ctx).await
        }
    };

    StageReport {
        bundle,
        outcome: StageOutcome::from_success(success),
        elapsed_ms: elapsed_ms(start),
        payload,
    }
}

/// Runs commands in order, collecting `--Internal:` segments.
///
/// With `stop_on_failure` the sequence ends at the first failing command;
/// otherwise every command runs. Returns whether all commands succeeded.
pub(crate) async fn run_sequence(
    tools: &dyn ToolRunner,
    workdir: &Path,
    commands: &[(String, &str)],
    stop_on_failure: bool,
    logs: &mut String,
) -> bool {
    let mut all_ok = true;
    for (command, context) in commands {
        let ok = run_logged(tools, workdir, command, context, logs)
            .await
            .is_some_and(|out| out.success());
        if !ok {
            all_ok = false;
            if stop_on_failure {
                break;
            }
        }
    }
    all_ok
}

/// Runs a single command and appends its segment. `None` when the command
/// could not be run at all.
pub(crate) async fn run_logged(
    tools: &dyn ToolRunner,
    workdir: &Path,
    command: &str,
    context: &str,
    logs: &mut String,
) -> Option<ToolOutput> {
    match tools.run(command, workdir).await {
        Ok(out) => {
            push_segment(logs, context, &out.output);
            Some(out)
        }
        Err(err) => {
            push_segment(logs, context, &format!("{command}: {err}"));
            None
        }
    }
}

pub(crate) fn push_segment(logs: &mut String, context: &str, body: &str) {
    if !logs.is_empty() && !logs.ends_with('\n') {
        logs.push('\n');
    }
    logs.push_str(&internal_segment(context, body));
}
