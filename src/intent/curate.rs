use super::normalize::normalize_service_intent;
use super::prompts::{build_generation_context, PresetName};
use crate::adapters::{parse_json_object, GenerationRequest, GenerationService, CURATION_TIMEOUT};
use crate::config::IntentMethod;
use crate::error::Result;
use crate::runlog::{context, RunLog};
use crate::schema::{service_schema, service_schema_with_improvement_plan, ResponseFormat};
use crate::types::{CoreIntent, IntentAnswer};
use serde_json::Value;
use tracing::{debug, info};

#[must_use]
pub const fn curation_preset(method: IntentMethod) -> PresetName {
    match method {
        IntentMethod::CuratedZeroShot | IntentMethod::CuratedFewShot => {
            PresetName::KubernetesServicePlain
        }
        _ => PresetName::KubernetesServiceStructured,
    }
}

/// Previous answer as shown to the curator, without its improvement plan.
fn previous_answer(answer: &IntentAnswer) -> String {
    match answer {
        IntentAnswer::Structured(Value::Object(map)) => {
            let mut trimmed = map.clone();
            trimmed.remove("improvement_plan");
            serde_json::to_string_pretty(&trimmed).unwrap_or_default()
        }
        other => other.display_text(),
    }
}

/// Curation prompt for the current iteration of `intent`.
#[must_use]
pub fn curation_prompt(intent: &CoreIntent, method: IntentMethod) -> String {
    let context = build_generation_context(intent, curation_preset(method), true);
    let request = intent.request();
    let last = &intent.last_try;
    if last.iteration.is_none() {
        return format!("Context: {context}\nTask: {request}");
    }

    let mut prompt = format!("Context: {context}\nTask: {request}\n");
    if !last.answer.is_unset() {
        prompt.push_str(&format!("Previous answer:\n{}\n", previous_answer(&last.answer)));
    }
    if let Some(grade) = &last.grade {
        prompt.push_str(&format!(
            "Previous score: {}\nReason: {}\n",
            grade.score, grade.explanation
        ));
    }
    prompt.push('\n');
    prompt
}

/// Response format requested for `method`; `None` when the method does not
/// call the service at all.
///
/// # Errors
///
/// Only on an internal inconsistency of a schema definition.
pub fn curation_format(
    method: IntentMethod,
    later_iteration: bool,
) -> Result<Option<ResponseFormat>> {
    Ok(match method {
        IntentMethod::None => None,
        IntentMethod::CuratedZeroShot | IntentMethod::CuratedFewShot => {
            Some(ResponseFormat::FreeText)
        }
        IntentMethod::OnlyJsonFormat => Some(ResponseFormat::Json),
        IntentMethod::JsonWithRequired if later_iteration => Some(ResponseFormat::Schema(
            service_schema_with_improvement_plan()?,
        )),
        IntentMethod::JsonWithRequired => Some(ResponseFormat::Schema(service_schema()?)),
    })
}

/// One curation call.
///
/// `json-with-required` answers come back normalized.
///
/// # Errors
///
/// Returns `ServiceUnavailable` when the service gives no answer and
/// `MalformedResponse` when a structured method's answer is not a JSON
/// object.
pub async fn curate(
    intent: &CoreIntent,
    method: IntentMethod,
    generation: &dyn GenerationService,
    log: &RunLog,
) -> Result<IntentAnswer> {
    let later = intent.last_try.iteration.is_some();
    let Some(format) = curation_format(method, later)? else {
        return Ok(IntentAnswer::Text(intent.request().to_string()));
    };

    let request = GenerationRequest::new(curation_prompt(intent, method), format, CURATION_TIMEOUT);
    log.note(
        context::CONTROL,
        &format!("Request for curation ({method}):\n{}", request.prompt),
    )
    .await;
    let text = generation.generate(&request).await?;
    debug!(method = %method, chars = text.len(), "curation answer received");

    let answer = match method {
        IntentMethod::OnlyJsonFormat => {
            IntentAnswer::Structured(Value::Object(parse_json_object(&text)?))
        }
        IntentMethod::JsonWithRequired => IntentAnswer::Structured(normalize_service_intent(
            Value::Object(parse_json_object(&text)?),
        )?),
        _ => IntentAnswer::Text(text),
    };
    log.note(
        context::INTENT_EXTRACTION,
        &format!("Curated intent with success: \n{}", answer.display_text()),
    )
    .await;
    info!(method = %method, iteration = intent.iteration, "intent curated");
    Ok(answer)
}
