use super::{push_segment, ArtifactChange, Collaborators, FixContext, RunContext, StagePayload};
use crate::adapters::{parse_json_object, GenerationRequest, GENERATION_TIMEOUT};
use crate::error::Result;
use crate::runlog::context;
use crate::schema::{fix_schema, ResponseFormat};
use crate::types::{ArtifactBundle, ArtifactSlot};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Replacements this short are read as "leave this artifact alone".
pub const MIN_REPLACEMENT_LEN: usize = 50;

const LOG_TAIL_CHARS: usize = 4000;

fn log_tail(logs: &str) -> &str {
    let count = logs.chars().count();
    if count <= LOG_TAIL_CHARS {
        return logs;
    }
    logs.char_indices()
        .nth(count - LOG_TAIL_CHARS)
        .map_or(logs, |(index, _)| &logs[index..])
}

#[must_use]
pub fn fix_prompt(intent: &str, bundle: &ArtifactBundle, fix: &FixContext) -> String {
    let stage = fix.failed_stage;
    let mut prompt = format!(
        "Task: You are a senior software engineer helping fix a failing deploymnent pipeline.
Work step-by-step internally, but output only valid JSON matching the given schema.

- Requested service:
{intent}

- Current pipeline stage: {stage}
- Environment is known-good; only code artifacts may be changed
- Make minimal changes that directly address the failure
- If no errors found, do not change nothing

Artifacts:
myapp.py:
{code}
--
Dockerfile:
{container}
--
vibe.yaml:
{manifest}
--
requirements.txt:
{requirements}

- Identify the single primary root cause tied to {stage}.
- Edit only artifacts with the improved solution
- If other artifact is not required to be fixed, dont write anything on their JSON slot
",
        code = bundle.code.content,
        container = bundle.container.content,
        manifest = bundle.manifest.content,
        requirements = bundle.requirements.content,
    );
    if !fix.logs.trim().is_empty() {
        prompt.push_str(&format!(
            "\nOutput of the failing {} run ({}):\n{}\n",
            fix.preceding,
            fix.result,
            log_tail(&fix.logs)
        ));
    }
    prompt
}

/// Applies every plausible replacement and reports what changed.
fn apply_changes(
    bundle: ArtifactBundle,
    answer: &Map<String, Value>,
) -> (ArtifactBundle, Vec<ArtifactChange>) {
    ArtifactSlot::ALL
        .into_iter()
        .fold((bundle, Vec::new()), |(bundle, mut changes), slot| {
            let replacement = answer
                .get(slot.default_file())
                .and_then(Value::as_str)
                .filter(|text| text.chars().count() > MIN_REPLACEMENT_LEN);
            match replacement {
                Some(after) if after != bundle.slot(slot).content => {
                    changes.push(ArtifactChange {
                        slot,
                        before: bundle.slot(slot).content.clone(),
                        after: after.to_string(),
                    });
                    (bundle.with_content(slot, after), changes)
                }
                _ => (bundle, changes),
            }
        })
}

async fn request_fix(
    prompt: String,
    ctx: &RunContext,
    collab: &Collaborators,
) -> Result<Map<String, Value>> {
    let request = GenerationRequest::new(
        prompt,
        ResponseFormat::Schema(fix_schema()?),
        GENERATION_TIMEOUT,
    );
    ctx.log
        .note(context::CONTROL, &format!("Request for generate:\n{}", request.prompt))
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
    fix: &FixContext,
) -> (ArtifactBundle, bool, StagePayload) {
    let bundle = bundle.with_revision_bump();
    let prompt = fix_prompt(&ctx.intent, &bundle, fix);

    match request_fix(prompt, ctx, collab).await {
        Ok(answer) => {
            let (fixed, changes) = apply_changes(bundle, &answer);
            if let Some(explanation) = answer.get("explanation").and_then(Value::as_str) {
                ctx.log.note(context::FIX, explanation).await;
            }
            info!(
                revision = fixed.revision,
                changed = changes.len(),
                failed_stage = %fix.failed_stage,
                "fix applied"
            );
            (fixed, true, StagePayload::Changes(changes))
        }
        Err(err) => {
            // Unreachable service and unreadable reply alike count as no
            // answer; the next FIX iteration retries.
            warn!(error = %err, "fix request produced no usable answer");
            let mut logs = bundle.logs.clone();
            push_segment(&mut logs, context::FIX, &err.to_string());
            ctx.log.note(context::FIX, &err.to_string()).await;
            (bundle.with_logs(logs), true, StagePayload::Changes(Vec::new()))
        }
    }
}
