//! Pipeline scenarios driven through the public API with scripted
//! collaborators.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use kubevibe::adapters::{
    GenerationRequest, GenerationService, PortFuture, PortProbe, ToolOutput, ToolRunner,
};
use kubevibe::config::{FixResumePolicy, IntentMethod, ValidationMethod};
use kubevibe::intent::{
    FewShotBank, IntentLoop, IntentOptions, IntentResolution, ScriptedClarifications,
};
use kubevibe::pipeline::{Pipeline, PipelineOptions, RunStatus};
use kubevibe::runlog::{RunLog, RUN_LOG_FILE};
use kubevibe::stages::{
    Collaborators, Endpoint, RunContext, StaticArtifactValidator, CONNECT_NAMESPACE,
};
use kubevibe::{Stage, StageOutcome, VibeError, GENERATION_ERROR_MARKER};
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

const MANIFEST: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: echo\nspec:\n  selector:\n    matchLabels:\n      app: echo\n  template:\n    metadata:\n      labels:\n        app: echo\n    spec:\n      containers:\n      - name: echo\n        image: registry.test/myapp:latest\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: echo\nspec:\n  selector:\n    app: echo\n  ports:\n  - port: 80\n    targetPort: 5000\n";

/// A cluster, registry and generation service in one recorder.
#[derive(Debug, Default)]
struct World {
    replies: Mutex<VecDeque<Result<String, VibeError>>>,
    failing_once: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
    open_ports: BTreeSet<u16>,
    probed: Mutex<Vec<(String, u16)>>,
}

impl World {
    fn with_open_ports(ports: &[u16]) -> Self {
        Self {
            open_ports: ports.iter().copied().collect(),
            ..Self::default()
        }
    }

    async fn reply(&self, text: String) {
        self.replies.lock().await.push_back(Ok(text));
    }

    async fn fail_once(&self, prefix: &str) {
        self.failing_once.lock().await.push(prefix.to_string());
    }
}

impl ToolRunner for World {
    fn run<'a>(&'a self, command: &'a str, _workdir: &'a Path) -> PortFuture<'a, ToolOutput> {
        Box::pin(async move {
            self.commands.lock().await.push(command.to_string());
            let mut failing = self.failing_once.lock().await;
            if let Some(index) = failing.iter().position(|p| command.starts_with(p.as_str())) {
                failing.remove(index);
                return Ok(ToolOutput {
                    status: 1,
                    output: "simulated failure".to_string(),
                    truncated: false,
                });
            }
            let output = if command.contains(" get svc ") {
                json!({"items": [{"spec": {"clusterIP": "10.96.0.42"}}]}).to_string()
            } else {
                String::new()
            };
            Ok(ToolOutput {
                status: 0,
                output,
                truncated: false,
            })
        })
    }
}

impl GenerationService for World {
    fn generate<'a>(&'a self, _request: &'a GenerationRequest) -> PortFuture<'a, String> {
        Box::pin(async move {
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| {
                    Err(VibeError::ServiceUnavailable(
                        "connection refused".to_string(),
                    ))
                })
        })
    }
}

impl PortProbe for World {
    fn probe<'a>(&'a self, host: &'a str, port: u16, _timeout: Duration) -> PortFuture<'a, bool> {
        Box::pin(async move {
            self.probed.lock().await.push((host.to_string(), port));
            Ok(self.open_ports.contains(&port))
        })
    }
}

fn artifacts(manifest: &str) -> String {
    json!({
        "pythonfilecontent": "from flask import Flask\napp = Flask(__name__)\napp.run(host='0.0.0.0', port=5000)\n",
        "containerfilecontent": "FROM python:3.11-slim\nCOPY . /app\nCMD [\"python\", \"/app/myapp.py\"]\n",
        "yamlfilecontent": manifest,
        "requirements": "flask\n"
    })
    .to_string()
}

fn given_pipeline(world: &Arc<World>, options: PipelineOptions) -> (Pipeline, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = RunContext {
        intent: "an echo service".to_string(),
        model: "scenario-model".to_string(),
        run_dir: dir.path().join("run"),
        image_repo: "registry.test".to_string(),
        settle_delay: Duration::ZERO,
        log: RunLog::discard(),
    };
    let collab = Collaborators {
        tools: world.clone(),
        generation: world.clone(),
        probe: world.clone(),
        validator: Arc::new(StaticArtifactValidator),
    };
    (Pipeline::new(ctx, collab, options), dir)
}

#[tokio::test]
async fn bad_manifest_is_repaired_and_build_resumes() {
    let world = Arc::new(World::with_open_ports(&[80]));
    world.reply(artifacts("kind: [unterminated")).await;
    world
        .reply(json!({
            "myapp.py": "",
            "Dockerfile": "",
            "vibe.yaml": MANIFEST,
            "requirements.txt": "",
            "explanation": "manifest was not valid YAML"
        })
        .to_string())
        .await;
    let (pipeline, _dir) = given_pipeline(&world, PipelineOptions::default());

    let report = pipeline.run().await;

    let trace = report.trace();
    assert_eq!((trace[0].from, trace[0].to), (Stage::Generate, Stage::Build));
    assert_eq!(trace[1].from, Stage::Build);
    assert_eq!(trace[1].result, StageOutcome::Failed);
    assert_eq!(trace[1].to, Stage::Fix);
    assert_eq!(trace[2].from, Stage::Fix);
    assert_eq!(trace[2].result, StageOutcome::Passed);
    assert_eq!(trace[2].to, Stage::Build);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.bundle.manifest.content, MANIFEST);
}

#[tokio::test]
async fn fix_from_zero_resumes_at_generate() {
    let world = Arc::new(World::with_open_ports(&[80]));
    world.reply(artifacts(MANIFEST)).await;
    world.reply(json!({"explanation": "nothing to change"}).to_string()).await;
    world.reply(artifacts(MANIFEST)).await;
    world.fail_once("docker build").await;
    let options = PipelineOptions {
        resume_policy: FixResumePolicy::Generate,
        ..PipelineOptions::default()
    };
    let (pipeline, _dir) = given_pipeline(&world, options);

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.trace()[2].to, Stage::Generate);
}

#[tokio::test]
async fn connect_probes_ports_in_order_until_one_answers() {
    let world = Arc::new(World::with_open_ports(&[5000]));
    world.reply(artifacts(MANIFEST)).await;
    let (pipeline, _dir) = given_pipeline(&world, PipelineOptions::default());

    let report = pipeline.run().await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(
        report.endpoint,
        Some(Endpoint {
            host: "10.96.0.42".to_string(),
            port: 5000
        })
    );
    let probed = world.probed.lock().await.clone();
    assert_eq!(
        probed.iter().map(|(_, port)| *port).collect::<Vec<_>>(),
        vec![80, 443, 5000]
    );
    assert!(probed.iter().all(|(host, _)| host == "10.96.0.42"));
    let commands = world.commands.lock().await.clone();
    assert!(commands
        .iter()
        .any(|c| c.starts_with("kubectl delete namespace") && c.contains(CONNECT_NAMESPACE)));
}

#[tokio::test]
async fn silent_generation_service_marks_artifacts_and_fails_the_stage() {
    let world = Arc::new(World::default());
    let options = PipelineOptions {
        max_iterations: Some(1),
        ..PipelineOptions::default()
    };
    let (pipeline, _dir) = given_pipeline(&world, options);

    let report = pipeline.run().await;

    let generated = report
        .history
        .bundles()
        .find(|bundle| bundle.stage == Some(Stage::Generate))
        .cloned()
        .unwrap();
    assert_eq!(generated.result, StageOutcome::Failed);
    assert_eq!(generated.code.content, GENERATION_ERROR_MARKER);
    assert_eq!(generated.container.content, GENERATION_ERROR_MARKER);
    assert_eq!(generated.manifest.content, GENERATION_ERROR_MARKER);
    assert_eq!(report.trace()[0].to, Stage::Fix);
}

#[tokio::test]
async fn every_run_ends_within_its_budget() {
    let world = Arc::new(World::default());
    for budget in [1_u32, 3, 12, 25] {
        let options = PipelineOptions {
            max_iterations: Some(budget),
            ..PipelineOptions::default()
        };
        let (pipeline, _dir) = given_pipeline(&world, options);

        let report = pipeline.run().await;

        assert_ne!(report.status, RunStatus::Success);
        assert!(report.stages_run <= budget);
        assert_eq!(report.trace().len(), report.stages_run as usize);
    }
}

#[tokio::test]
async fn run_log_is_created_and_only_appended() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run").join(RUN_LOG_FILE);
    let log = RunLog::create(&path).await.unwrap();
    log.append("control", "first").await.unwrap();
    log.append("phase", "GENERATE").await.unwrap();

    let text = tokio::fs::read_to_string(&path).await.unwrap();
    let first = text.find("--control--\nfirst\n").unwrap();
    let second = text.find("--phase--\nGENERATE\n").unwrap();
    assert!(first < second);
    assert!(text.starts_with("--Log: "));
}

#[tokio::test]
async fn intent_loop_feeds_an_approved_intent_to_the_pipeline() {
    let world = Arc::new(World::with_open_ports(&[80]));
    world.reply("A flask echo service answering on /".to_string()).await;
    world
        .reply(
            json!({"score": 5, "explanation": "complete", "suggested_action": "approve"})
                .to_string(),
        )
        .await;
    let options = IntentOptions {
        method: IntentMethod::CuratedZeroShot,
        validation: ValidationMethod::LlmAsJudge,
        hands_free: true,
        timeout: None,
        max_iterations: Some(3),
    };
    let mut intent = IntentLoop::new(
        "echo api",
        options,
        world.clone(),
        FewShotBank::new("missing-bank", Vec::new()),
        RunLog::discard(),
    );

    let report = intent
        .run_to_completion(&mut ScriptedClarifications::default())
        .await
        .unwrap();

    assert!(report.core.valid);
    assert_eq!(
        report.resolution,
        IntentResolution::Approved("A flask echo service answering on /".to_string())
    );
}
