use super::transition::{decide, FailureCounter, TransitionDecision, TransitionReason};
use crate::config::FixResumePolicy;
use crate::error::Result;
use crate::runlog::context;
use crate::stages::{self, Collaborators, Endpoint, FixContext, RunContext, StagePayload};
use crate::timing::Stopwatch;
use crate::types::{ArtifactBundle, History, Stage, StageOutcome, TraceEntry};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Cooperative stop request, checked once per iteration.
#[derive(Debug, Clone, Default)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    FailureCeiling,
    Timeout,
    IterationBudget,
    /// The table itself led to `FAIL`.
    Terminal,
}

impl FailReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailureCeiling => "failure ceiling reached",
            Self::Timeout => "wall-clock timeout",
            Self::IterationBudget => "iteration budget exhausted",
            Self::Terminal => "terminal failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed(FailReason),
    Halted,
}

impl RunStatus {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Process exit code for this status.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed(_) => 1,
            Self::Halted => 130,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed(reason) => write!(f, "FAIL ({})", reason.as_str()),
            Self::Halted => write!(f, "HALTED (manually stopped)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineOptions {
    pub resume_policy: FixResumePolicy,
    pub timeout: Option<Duration>,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub elapsed: Duration,
    pub bundle: ArtifactBundle,
    pub history: History,
    /// Last endpoint CONNECT discovered.
    pub endpoint: Option<Endpoint>,
    pub chart: Option<PathBuf>,
    pub stages_run: u32,
}

impl RunReport {
    #[must_use]
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.history.trace_vec()
    }
}

/// Drives the stage FSM from `GENERATE` to a terminal state.
#[derive(Debug, Clone)]
pub struct Pipeline {
    ctx: RunContext,
    collab: Collaborators,
    options: PipelineOptions,
    halt: HaltSignal,
}

struct Cursor {
    stage: Stage,
    bundle: ArtifactBundle,
    history: History,
    failures: FailureCounter,
    /// Non-FIX stage whose failure opened the current repair cycle.
    failed_origin: Option<Stage>,
    stages_run: u32,
    endpoint: Option<Endpoint>,
    chart: Option<PathBuf>,
}

impl Pipeline {
    #[must_use]
    pub fn new(ctx: RunContext, collab: Collaborators, options: PipelineOptions) -> Self {
        Self {
            ctx,
            collab,
            options,
            halt: HaltSignal::new(),
        }
    }

    #[must_use]
    pub fn with_halt(mut self, halt: HaltSignal) -> Self {
        self.halt = halt;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn stop_reason(&self, cursor: &Cursor, clock: &Stopwatch) -> Option<RunStatus> {
        match cursor.stage {
            Stage::Success => return Some(RunStatus::Success),
            Stage::Fail => return Some(RunStatus::Failed(FailReason::Terminal)),
            _ => {}
        }
        if self.halt.is_set() {
            return Some(RunStatus::Halted);
        }
        if clock.exceeded(self.options.timeout) {
            return Some(RunStatus::Failed(FailReason::Timeout));
        }
        if self
            .options
            .max_iterations
            .is_some_and(|max| cursor.stages_run >= max)
        {
            return Some(RunStatus::Failed(FailReason::IterationBudget));
        }
        None
    }

    /// The failure ceiling overrides the transition table.
    fn next_decision(
        &self,
        stage: Stage,
        outcome: StageOutcome,
        failures: FailureCounter,
        failed_origin: Option<Stage>,
    ) -> Result<TransitionDecision> {
        if failures.reached_ceiling() {
            return Ok(TransitionDecision::new(
                Stage::Fail,
                TransitionReason::FailureCeilingReached,
            ));
        }
        decide(stage, outcome, self.options.resume_policy.resume_stage(failed_origin))
    }

    fn fix_context(cursor: &Cursor) -> FixContext {
        let preceding = cursor.bundle.stage.unwrap_or(Stage::Generate);
        FixContext {
            failed_stage: cursor.failed_origin.unwrap_or(preceding),
            preceding,
            result: cursor.bundle.result,
            logs: cursor.bundle.logs.clone(),
        }
    }

    pub async fn run(&self) -> RunReport {
        let clock = Stopwatch::start();
        let initial = ArtifactBundle::new();
        let mut cursor = Cursor {
            stage: Stage::Generate,
            history: History::new().with_bundle(initial.clone()),
            bundle: initial,
            failures: FailureCounter::new(),
            failed_origin: None,
            stages_run: 0,
            endpoint: None,
            chart: None,
        };

        let status = loop {
            if let Some(status) = self.stop_reason(&cursor, &clock) {
                if status == RunStatus::Halted {
                    let at = cursor.bundle.stage.unwrap_or(cursor.stage);
                    let halted = cursor
                        .bundle
                        .clone()
                        .stamped(at, StageOutcome::Halted, cursor.stages_run);
                    self.log_snapshot(&halted).await;
                    cursor.history = cursor.history.with_bundle(halted.clone());
                    cursor.bundle = halted;
                }
                break status;
            }
            let Some(kind) = cursor.stage.kind() else {
                break RunStatus::Failed(FailReason::Terminal);
            };

            let fix = (cursor.stage == Stage::Fix).then(|| Self::fix_context(&cursor));
            let report = stages::execute(
                kind,
                cursor.bundle.clone(),
                &self.ctx,
                &self.collab,
                fix.as_ref(),
            )
            .await;

            cursor.stages_run = cursor.stages_run.saturating_add(1);
            let step = cursor.stages_run;
            let outcome = report.outcome;
            cursor.failures = cursor.failures.record(outcome);

            match report.payload {
                StagePayload::Endpoint(found) => cursor.endpoint = found,
                StagePayload::Chart(Some(path)) => cursor.chart = Some(path),
                _ => {}
            }
            if cursor.stage != Stage::Fix {
                cursor.failed_origin = (!outcome.is_success()).then_some(cursor.stage);
            }

            let decision = match self.next_decision(
                cursor.stage,
                outcome,
                cursor.failures,
                cursor.failed_origin,
            ) {
                Ok(decision) => decision,
                Err(err) => {
                    warn!(error = %err, "no transition");
                    break RunStatus::Failed(FailReason::Terminal);
                }
            };

            let entry = TraceEntry::new(step, cursor.stage, outcome, decision.to());
            info!(
                %entry,
                reason = decision.reason_code(),
                elapsed_ms = report.elapsed_ms,
                "transition"
            );
            let bundle = report.bundle.stamped(cursor.stage, outcome, step);
            self.log_snapshot(&bundle).await;

            cursor.history = cursor.history.with_entry(entry).with_bundle(bundle.clone());
            cursor.bundle = bundle;
            cursor.stage = decision.to();

            if decision.reason() == TransitionReason::FailureCeilingReached {
                break RunStatus::Failed(FailReason::FailureCeiling);
            }
        };

        info!(%status, stages = cursor.stages_run, "pipeline finished");
        self.ctx
            .log
            .note(context::CONTROL, &format!("Pipeline finished: {status}"))
            .await;

        RunReport {
            status,
            elapsed: clock.counted(),
            bundle: cursor.bundle,
            history: cursor.history,
            endpoint: cursor.endpoint,
            chart: cursor.chart,
            stages_run: cursor.stages_run,
        }
    }

    async fn log_snapshot(&self, bundle: &ArtifactBundle) {
        match serde_json::to_string_pretty(bundle) {
            Ok(json) => {
                self.ctx
                    .log
                    .note(context::BUNDLE, &format!("digest {}\n{json}", bundle.digest()))
                    .await;
            }
            Err(err) => warn!(error = %err, "bundle snapshot not serializable"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{FailReason, HaltSignal, Pipeline, PipelineOptions, RunStatus};
    use crate::config::FixResumePolicy;
    use crate::pipeline::transition::{FailureCounter, TransitionReason};
    use crate::pipeline::FAILURE_CEILING;
    use crate::stages::Endpoint;
    use crate::test_support::{given_context, svc_listing, FakeCollaborators, VALID_MANIFEST};
    use crate::types::{Stage, StageOutcome};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn artifacts_reply() -> crate::Result<String> {
        Ok(json!({
            "pythonfilecontent": "from flask import Flask\napp = Flask(__name__)\napp.run(port=5000)\n",
            "containerfilecontent": "FROM python:3.11-slim\nCOPY . /app\n",
            "yamlfilecontent": VALID_MANIFEST,
            "requirements": "flask"
        })
        .to_string())
    }

    async fn given_a_healthy_cluster() -> FakeCollaborators {
        FakeCollaborators::new()
            .with_generation_reply(artifacts_reply())
            .await
            .with_tool_reply("kubectl -n vibe-test-service get svc", 0, &svc_listing("10.1.2.3"))
            .await
            .with_open_port(80)
            .await
    }

    fn when_running(fakes: &FakeCollaborators, options: PipelineOptions) -> (Pipeline, TempDir) {
        let (ctx, dir) = given_context();
        (Pipeline::new(ctx, fakes.collaborators(), options), dir)
    }

    fn then_path(trace: &[crate::types::TraceEntry]) -> Vec<Stage> {
        trace.iter().map(|entry| entry.to).collect()
    }

    #[tokio::test]
    async fn healthy_run_reaches_success_with_endpoint_and_chart() {
        let fakes = given_a_healthy_cluster().await;
        let (pipeline, _dir) = when_running(&fakes, PipelineOptions::default());

        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(
            then_path(&report.trace()),
            vec![
                Stage::Build,
                Stage::Validate,
                Stage::Deploy,
                Stage::Connect,
                Stage::Chart,
                Stage::Success
            ]
        );
        assert_eq!(
            report.endpoint,
            Some(Endpoint {
                host: "10.1.2.3".to_string(),
                port: 80
            })
        );
        assert!(report.chart.is_some());
        assert_eq!(report.history.bundle_count(), 7);
        assert_eq!(report.bundle.stage, Some(Stage::Chart));
        assert_eq!(report.bundle.step, 6);
    }

    #[tokio::test]
    async fn build_failure_is_repaired_and_resumes_at_build() {
        let fakes = given_a_healthy_cluster()
            .await
            .with_tool_reply_once("docker build", 1, "COPY failed")
            .await;
        let (pipeline, _dir) = when_running(&fakes, PipelineOptions::default());

        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Success);
        let trace = report.trace();
        assert_eq!(trace[1].from, Stage::Build);
        assert_eq!(trace[1].result, StageOutcome::Failed);
        assert_eq!(trace[1].to, Stage::Fix);
        assert_eq!(trace[2].from, Stage::Fix);
        assert_eq!(trace[2].to, Stage::Build);
        assert_eq!(report.bundle.revision, 2);
    }

    #[tokio::test]
    async fn fix_from_zero_restarts_at_generate() {
        let fakes = given_a_healthy_cluster()
            .await
            .with_tool_reply_once("docker build", 1, "COPY failed")
            .await
            .with_generation_reply(Ok("{}".to_string()))
            .await
            .with_generation_reply(artifacts_reply())
            .await;
        let options = PipelineOptions {
            resume_policy: FixResumePolicy::Generate,
            ..PipelineOptions::default()
        };

        let (pipeline, _dir) = when_running(&fakes, options);
        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.trace()[2].to, Stage::Generate);
    }

    #[tokio::test]
    async fn tenth_consecutive_failure_overrides_the_table() {
        let fakes = FakeCollaborators::new();
        let (pipeline, _dir) = when_running(&fakes, PipelineOptions::default());
        let failures_before = |count: u32| {
            (0..count).fold(FailureCounter::new(), |counter, _| {
                counter.record(StageOutcome::Failed)
            })
        };

        let ninth = pipeline
            .next_decision(
                Stage::Fix,
                StageOutcome::Failed,
                failures_before(FAILURE_CEILING - 1),
                Some(Stage::Build),
            )
            .unwrap();
        assert_eq!(ninth.to(), Stage::Fix);

        let tenth = pipeline
            .next_decision(
                Stage::Fix,
                StageOutcome::Failed,
                failures_before(FAILURE_CEILING),
                Some(Stage::Build),
            )
            .unwrap();
        assert_eq!(tenth.to(), Stage::Fail);
        assert_eq!(tenth.reason(), TransitionReason::FailureCeilingReached);

        let from_build = pipeline
            .next_decision(
                Stage::Build,
                StageOutcome::Failed,
                failures_before(FAILURE_CEILING),
                Some(Stage::Build),
            )
            .unwrap();
        assert_eq!(from_build.to(), Stage::Fail);
    }

    #[tokio::test]
    async fn permanent_build_failure_alternates_with_fix_until_the_budget() {
        let fakes = FakeCollaborators::new()
            .with_generation_reply(artifacts_reply())
            .await
            .with_tool_reply("docker build", 1, "always broken")
            .await;
        let options = PipelineOptions {
            max_iterations: Some(12),
            ..PipelineOptions::default()
        };
        let (pipeline, _dir) = when_running(&fakes, options);

        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Failed(FailReason::IterationBudget));
        let trace = report.trace();
        for entry in trace.iter().skip(1) {
            match entry.from {
                Stage::Build => {
                    assert_eq!(entry.result, StageOutcome::Failed);
                    assert_eq!(entry.to, Stage::Fix);
                }
                Stage::Fix => {
                    assert_eq!(entry.result, StageOutcome::Passed);
                    assert_eq!(entry.to, Stage::Build);
                }
                other => panic!("unexpected stage {other}"),
            }
        }
        assert!(trace.iter().all(|entry| entry.to != Stage::Fail));
    }

    #[tokio::test]
    async fn iteration_budget_bounds_the_run() {
        let fakes = FakeCollaborators::new()
            .with_tool_reply("docker build", 1, "always broken")
            .await;
        let options = PipelineOptions {
            max_iterations: Some(4),
            ..PipelineOptions::default()
        };

        let (pipeline, _dir) = when_running(&fakes, options);
        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Failed(FailReason::IterationBudget));
        assert_eq!(report.stages_run, 4);
        assert_eq!(report.trace().len(), 4);
    }

    #[tokio::test]
    async fn zero_timeout_stops_before_any_stage() {
        let fakes = FakeCollaborators::new();
        let options = PipelineOptions {
            timeout: Some(Duration::ZERO),
            ..PipelineOptions::default()
        };

        let (pipeline, _dir) = when_running(&fakes, options);
        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Failed(FailReason::Timeout));
        assert!(report.trace().is_empty());
    }

    #[tokio::test]
    async fn halt_short_circuits_without_a_transition() {
        let fakes = given_a_healthy_cluster().await;
        let halt = HaltSignal::new();
        halt.trigger();
        let (pipeline, _dir) = when_running(&fakes, PipelineOptions::default());
        let pipeline = pipeline.with_halt(halt);

        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Halted);
        assert_eq!(report.stages_run, 0);
        assert_eq!(report.bundle.result, StageOutcome::Halted);
        assert_eq!(report.history.bundle_count(), 2);
        let last = report.history.bundles().last().cloned().unwrap();
        assert_eq!(last.result, StageOutcome::Halted);
        assert!(report.trace().is_empty());
    }
}
