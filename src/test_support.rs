//! In-crate fakes for the collaborator traits.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use crate::adapters::{
    GenerationRequest, GenerationService, PortFuture, PortProbe, ToolOutput, ToolRunner,
};
use crate::error::VibeError;
use crate::runlog::RunLog;
use crate::stages::{
    ArtifactValidator, Collaborators, RunContext, StaticArtifactValidator, ValidationReport,
};
use crate::types::{ArtifactBundle, ArtifactSlot};
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

pub const VALID_MANIFEST: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: hello\nspec:\n  replicas: 1\n  selector:\n    matchLabels:\n      app: hello\n  template:\n    metadata:\n      labels:\n        app: hello\n    spec:\n      containers:\n      - name: hello\n        image: registry.test/myapp:latest\n        ports:\n        - containerPort: 5000\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: hello\nspec:\n  type: ClusterIP\n  selector:\n    app: hello\n  ports:\n  - port: 80\n    targetPort: 5000\n";

pub fn given_bundle() -> ArtifactBundle {
    ArtifactBundle::new()
        .with_content(
            ArtifactSlot::Code,
            "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/')\ndef hello():\n    return 'hello'\n\napp.run(host='0.0.0.0', port=5000)\n",
        )
        .with_content(
            ArtifactSlot::Container,
            "FROM python:3.11-slim\nCOPY . /app\nRUN pip install -r /app/requirements.txt\nCMD [\"python\", \"/app/myapp.py\"]\n",
        )
        .with_content(ArtifactSlot::Manifest, VALID_MANIFEST)
        .with_content(ArtifactSlot::Requirements, "flask\n")
}

/// Context rooted in a fresh temporary directory, with no settle delay.
pub fn given_context() -> (RunContext, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = RunContext {
        intent: "a flask service answering hello on /".to_string(),
        model: "test-model".to_string(),
        run_dir: dir.path().join("run"),
        image_repo: "registry.test".to_string(),
        settle_delay: Duration::ZERO,
        log: RunLog::discard(),
    };
    (ctx, dir)
}

pub fn svc_listing(cluster_ip: &str) -> String {
    json!({"items": [{"spec": {"clusterIP": cluster_ip}}]}).to_string()
}

#[derive(Debug, Clone)]
struct ToolReply {
    prefix: String,
    status: i32,
    output: String,
    remaining: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FakeCollaborators {
    tool_replies: Arc<Mutex<Vec<ToolReply>>>,
    tool_calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
    generation_replies: Arc<Mutex<VecDeque<crate::Result<String>>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    open_ports: Arc<Mutex<BTreeSet<u16>>>,
    probes: Arc<Mutex<Vec<(String, u16)>>>,
    validation: Arc<Mutex<Option<bool>>>,
}

impl Default for FakeCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCollaborators {
    pub fn new() -> Self {
        Self {
            tool_replies: Arc::new(Mutex::new(Vec::new())),
            tool_calls: Arc::new(Mutex::new(Vec::new())),
            generation_replies: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            open_ports: Arc::new(Mutex::new(BTreeSet::new())),
            probes: Arc::new(Mutex::new(Vec::new())),
            validation: Arc::new(Mutex::new(Some(true))),
        }
    }

    /// Every command starting with `prefix` answers this way.
    pub async fn with_tool_reply(self, prefix: &str, status: i32, output: &str) -> Self {
        self.push_tool_reply(prefix, status, output, None).await
    }

    /// The next command starting with `prefix` answers this way, once.
    pub async fn with_tool_reply_once(self, prefix: &str, status: i32, output: &str) -> Self {
        self.push_tool_reply(prefix, status, output, Some(1)).await
    }

    async fn push_tool_reply(
        self,
        prefix: &str,
        status: i32,
        output: &str,
        remaining: Option<u32>,
    ) -> Self {
        let mut replies = self.tool_replies.lock().await;
        replies.push(ToolReply {
            prefix: prefix.to_string(),
            status,
            output: output.to_string(),
            remaining,
        });
        drop(replies);
        self
    }

    /// Queues one generation reply. An empty queue answers
    /// `ServiceUnavailable`.
    pub async fn with_generation_reply(self, reply: crate::Result<String>) -> Self {
        let mut replies = self.generation_replies.lock().await;
        replies.push_back(reply);
        drop(replies);
        self
    }

    pub async fn with_open_port(self, port: u16) -> Self {
        let mut ports = self.open_ports.lock().await;
        ports.insert(port);
        drop(ports);
        self
    }

    pub async fn with_validation(self, passes: bool) -> Self {
        let mut validation = self.validation.lock().await;
        *validation = Some(passes);
        drop(validation);
        self
    }

    pub async fn with_static_validator(self) -> Self {
        let mut validation = self.validation.lock().await;
        *validation = None;
        drop(validation);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        let shared = Arc::new(self.clone());
        Collaborators {
            tools: shared.clone(),
            generation: shared.clone(),
            probe: shared.clone(),
            validator: shared,
        }
    }

    pub async fn commands(&self) -> Vec<String> {
        self.tool_calls
            .lock()
            .await
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    pub async fn workdirs(&self) -> Vec<PathBuf> {
        self.tool_calls
            .lock()
            .await
            .iter()
            .map(|(_, dir)| dir.clone())
            .collect()
    }

    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.requests().await.into_iter().map(|r| r.prompt).collect()
    }

    pub async fn probed_ports(&self) -> Vec<u16> {
        self.probes.lock().await.iter().map(|(_, port)| *port).collect()
    }
}

impl ToolRunner for FakeCollaborators {
    fn run<'a>(&'a self, command: &'a str, workdir: &'a Path) -> PortFuture<'a, ToolOutput> {
        Box::pin(async move {
            self.tool_calls
                .lock()
                .await
                .push((command.to_string(), workdir.to_path_buf()));
            let mut replies = self.tool_replies.lock().await;
            let reply = replies
                .iter_mut()
                .find(|r| command.starts_with(&r.prefix) && r.remaining != Some(0));
            Ok(match reply {
                Some(reply) => {
                    if let Some(left) = reply.remaining.as_mut() {
                        *left -= 1;
                    }
                    ToolOutput {
                        status: reply.status,
                        output: reply.output.clone(),
                        truncated: false,
                    }
                }
                None => ToolOutput {
                    status: 0,
                    output: String::new(),
                    truncated: false,
                },
            })
        })
    }
}

impl GenerationService for FakeCollaborators {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> PortFuture<'a, String> {
        Box::pin(async move {
            self.requests.lock().await.push(request.clone());
            self.generation_replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| {
                    Err(VibeError::ServiceUnavailable("no scripted reply".to_string()))
                })
        })
    }
}

impl PortProbe for FakeCollaborators {
    fn probe<'a>(&'a self, host: &'a str, port: u16, _timeout: Duration) -> PortFuture<'a, bool> {
        Box::pin(async move {
            self.probes.lock().await.push((host.to_string(), port));
            Ok(self.open_ports.lock().await.contains(&port))
        })
    }
}

impl ArtifactValidator for FakeCollaborators {
    fn validate<'a>(&'a self, bundle: &'a ArtifactBundle) -> PortFuture<'a, ValidationReport> {
        Box::pin(async move {
            let mode = *self.validation.lock().await;
            match mode {
                Some(true) => Ok(ValidationReport::from_findings(Vec::new())),
                Some(false) => Ok(ValidationReport::from_findings(vec![
                    "rejected by validator".to_string(),
                ])),
                None => StaticArtifactValidator.validate(bundle).await,
            }
        })
    }
}
