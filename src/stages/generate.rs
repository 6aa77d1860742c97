use super::{push_segment, Collaborators, RunContext, StagePayload};
use crate::adapters::{parse_json_object, GenerationRequest, GENERATION_TIMEOUT};
use crate::error::{Result, VibeError};
use crate::runlog::context;
use crate::schema::{artifacts_schema, ResponseFormat};
use crate::types::{ArtifactBundle, ArtifactSlot};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Instructions sent ahead of the intent on every generation call.
#[must_use]
pub fn generation_context(image_repo: &str) -> String {
    format!(
        "You are an AI system that generates deployable Kubernetes service artifacts.

Your objective:
Deploy a working service inside an existing Kubernetes cluster, exposing port 80 through a Kubernetes Service.

You must return a JSON object with the following keys:
- yamlfilecontent (required): Kubernetes manifest(s) including one Deployment and one Service.
- containerfilecontent: Dockerfile text.
- pythonfilecontent: Python Flask service code.
- requirements: the content of requirements.txt listing every dependency of the app.

Rules:
- Follow the Task specification exactly. Do not invent endpoints, variables, or artifacts that are not defined there.
- Be deterministic: no explanations, no markdown, no comments, no placeholder text.
- If any field from the Task is missing, apply safe defaults.

Safe defaults:
- Image: {image_repo}/myapp:latest
- App file: myapp.py
- Language: Python 3.11
- Docker base image: python:3.11-slim
- Service type: ClusterIP
- Service port: 80, 443, or 5000
- Resources: requests cpu=100m/memory=128Mi; limits cpu=200m/memory=256Mi

Consistency requirements:
- Deployment container image == containerfile image name
- Container EXPOSE/served port == Service targetPort
- All HTTP endpoints listed in the Task exist in the Flask app

Output format:
Return exactly one JSON object with the keys above. No extra text, comments, or markdown."
    )
}

#[must_use]
pub fn generation_prompt(intent: &str, image_repo: &str) -> String {
    format!("Context: {}\nTask: {intent}", generation_context(image_repo))
}

fn string_field(answer: &Map<String, Value>, key: &str) -> Result<String> {
    answer
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| VibeError::MalformedResponse(format!("missing string field '{key}'")))
}

async fn request_artifacts(ctx: &RunContext, collab: &Collaborators) -> Result<Map<String, Value>> {
    let request = GenerationRequest::new(
        generation_prompt(&ctx.intent, &ctx.image_repo),
        ResponseFormat::Schema(artifacts_schema()?),
        GENERATION_TIMEOUT,
    );
    ctx.log
        .note(
            context::CONTROL,
            &format!("Request for generate:\n{}", request.prompt),
        )
        .await;
    let text = collab.generation.generate(&request).await?;
    ctx.log
        .note(context::ARTIFACT_GENERATION, &format!("Raw response\n{text}"))
        .await;
    parse_json_object(&text)
}

pub(super) async fn run(
    bundle: ArtifactBundle,
    ctx: &RunContext,
    collab: &Collaborators,
) -> (ArtifactBundle, bool, StagePayload) {
    let answer = match request_artifacts(ctx, collab).await {
        Ok(answer) => answer,
        Err(err) => return fail(bundle, &err),
    };

    let fields = (|| -> Result<(String, String, String)> {
        Ok((
            string_field(&answer, "pythonfilecontent")?,
            string_field(&answer, "containerfilecontent")?,
            string_field(&answer, "yamlfilecontent")?,
        ))
    })();
    let (code, container, manifest) = match fields {
        Ok(fields) => fields,
        Err(err) => return fail(bundle, &err),
    };

    let mut next = bundle
        .with_content(ArtifactSlot::Code, code)
        .with_content(ArtifactSlot::Container, container)
        .with_content(ArtifactSlot::Manifest, manifest);
    if let Some(requirements) = answer.get("requirements").and_then(Value::as_str) {
        next = next.with_content(ArtifactSlot::Requirements, requirements);
    }
    info!(digest = %next.digest(), "artifacts generated");
    (next.with_logs(String::new()), true, StagePayload::Nothing)
}

fn fail(bundle: ArtifactBundle, err: &VibeError) -> (ArtifactBundle, bool, StagePayload) {
    warn!(error = %err, "generation failed");
    let mut logs = String::new();
    push_segment(&mut logs, "generate", &err.to_string());
    (
        bundle.with_generation_error().with_logs(logs),
        false,
        StagePayload::Nothing,
    )
}
