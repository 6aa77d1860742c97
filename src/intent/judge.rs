use super::prompts::{build_validation_context, PresetName};
use crate::adapters::{parse_json_object, GenerationRequest, GenerationService, CURATION_TIMEOUT};
use crate::config::ValidationMethod;
use crate::error::{Result, VibeError};
use crate::runlog::{context, RunLog};
use crate::schema::{judge_schema, ResponseFormat};
use crate::types::{CoreIntent, Grade, IntentAnswer, SuggestedAction};
use serde_json::Value;
use tracing::info;

#[must_use]
pub fn offered_actions(hands_free: bool) -> Vec<SuggestedAction> {
    if hands_free {
        vec![SuggestedAction::Approve, SuggestedAction::Retry]
    } else {
        vec![
            SuggestedAction::Approve,
            SuggestedAction::Ask,
            SuggestedAction::Retry,
        ]
    }
}

#[must_use]
pub fn judge_prompt(intent: &CoreIntent, hands_free: bool) -> String {
    let context = build_validation_context(
        intent,
        PresetName::KubernetesServicePlain,
        &offered_actions(hands_free),
    );
    let answer = match &intent.answer {
        IntentAnswer::Structured(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.display_text(),
    };
    format!(
        "Context: {context}\nThe assigned task was: {}\nThe answer to evaluate is: {answer}",
        intent.request()
    )
}

/// Reads a judge reply, accepting integral floats as scores, and enforces
/// the action/field coupling locally.
///
/// # Errors
///
/// Returns `MalformedResponse` for anything the strict schema would reject.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_grade(text: &str, allow_ask: bool) -> Result<Grade> {
    let mut map = parse_json_object(text)?;
    let integral = map
        .get("score")
        .filter(|score| score.is_f64())
        .and_then(Value::as_f64)
        .filter(|score| score.fract().abs() < f64::EPSILON);
    if let Some(score) = integral {
        map.insert("score".to_string(), Value::from(score as i64));
    }
    let grade: Grade = serde_json::from_value(Value::Object(map))
        .map_err(|e| VibeError::MalformedResponse(format!("grade: {e}")))?;
    grade.check(allow_ask)?;
    Ok(grade)
}

/// Grades the current answer of `intent`.
///
/// # Errors
///
/// Returns `ServiceUnavailable` when the judge gives no answer and
/// `MalformedResponse` when its verdict breaks the strict schema.
pub async fn judge(
    intent: &CoreIntent,
    method: ValidationMethod,
    hands_free: bool,
    generation: &dyn GenerationService,
    log: &RunLog,
) -> Result<Grade> {
    let grade = match method {
        ValidationMethod::None => Grade::auto_approve(),
        ValidationMethod::LlmAsJudge => {
            let request = GenerationRequest::new(
                judge_prompt(intent, hands_free),
                ResponseFormat::Schema(judge_schema(hands_free)?),
                CURATION_TIMEOUT,
            );
            log.note(context::CONTROL, &format!("Request for judge\n{}", request.prompt))
                .await;
            let text = generation.generate(&request).await?;
            parse_grade(&text, !hands_free)?
        }
    };

    let rendered = serde_json::to_string_pretty(&grade)?;
    log.note(
        context::INTENT_VALIDATION,
        &format!(
            "Successfully intent validation with status {}. \nResult: {rendered}",
            u8::from(grade.approves())
        ),
    )
    .await;
    info!(
        method = method.as_str(),
        score = grade.score,
        action = %grade.suggested_action,
        "intent judged"
    );
    Ok(grade)
}
