use crate::error::{Result, VibeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    Approve,
    Retry,
    Ask,
}

impl SuggestedAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Retry => "retry",
            Self::Ask => "ask",
        }
    }
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Judge verdict on one curated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub score: i64,
    pub explanation: String,
    pub suggested_action: SuggestedAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_rationale: Option<String>,
}

impl Grade {
    /// Verdict used when no judge is configured.
    #[must_use]
    pub fn auto_approve() -> Self {
        Self {
            score: 5,
            explanation: "not validated".to_string(),
            suggested_action: SuggestedAction::Approve,
            clarification_question: None,
            clarification_answer: None,
            retry_rationale: None,
        }
    }

    #[must_use]
    pub fn approves(&self) -> bool {
        self.suggested_action == SuggestedAction::Approve && self.score == 5
    }

    /// Enforces the action/field coupling of the strict judge schema.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` when the score is out of range or the
    /// action carries the wrong companion fields.
    pub fn check(&self, allow_ask: bool) -> Result<()> {
        let has = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.trim().is_empty());
        let malformed = |msg: &str| Err(VibeError::MalformedResponse(format!("grade: {msg}")));

        if !(1..=5).contains(&self.score) {
            return malformed(&format!("score {} outside 1..=5", self.score));
        }
        match self.suggested_action {
            SuggestedAction::Approve => {
                if self.score != 5 {
                    return malformed("approve requires score 5");
                }
                if has(&self.clarification_question) || has(&self.retry_rationale) {
                    return malformed("approve must not carry a question or rationale");
                }
            }
            SuggestedAction::Ask => {
                if !allow_ask {
                    return malformed("ask is not offered in hands-free mode");
                }
                if self.score > 3 {
                    return malformed("ask requires score <= 3");
                }
                if !has(&self.clarification_question) {
                    return malformed("ask requires clarification_question");
                }
                if has(&self.retry_rationale) {
                    return malformed("ask must not carry retry_rationale");
                }
            }
            SuggestedAction::Retry => {
                if self.score > 4 {
                    return malformed("retry requires score <= 4");
                }
                if !has(&self.retry_rationale) {
                    return malformed("retry requires retry_rationale");
                }
                if has(&self.clarification_question) {
                    return malformed("retry must not carry clarification_question");
                }
            }
        }
        Ok(())
    }
}

/// Current curated intent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IntentAnswer {
    #[default]
    Unset,
    Text(String),
    Structured(Value),
}

impl IntentAnswer {
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Text shown to the judge and carried into the next curation prompt.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Unset => String::new(),
            Self::Text(text) => text.clone(),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LastTry {
    /// `None` before the first iteration.
    pub iteration: Option<u32>,
    pub answer: IntentAnswer,
    pub grade: Option<Grade>,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreIntent {
    request: String,
    pub iteration: u32,
    pub answer: IntentAnswer,
    pub grade: Option<Grade>,
    pub valid: bool,
    #[serde(rename = "last-try")]
    pub last_try: LastTry,
}

impl CoreIntent {
    #[must_use]
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            iteration: 0,
            answer: IntentAnswer::Unset,
            grade: None,
            valid: false,
            last_try: LastTry::default(),
        }
    }

    #[must_use]
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Snapshots the previous iteration into `last_try` and moves to
    /// `iteration`. Called once at the top of every loop iteration.
    pub fn begin_iteration(&mut self, iteration: u32) {
        self.last_try = LastTry {
            iteration: iteration.checked_sub(1),
            answer: self.answer.clone(),
            grade: self.grade.clone(),
            valid: self.valid,
        };
        self.iteration = iteration;
    }

    /// Records a judge verdict. `valid` is only ever set by an approving grade.
    pub fn record_grade(&mut self, grade: Grade) {
        self.valid = grade.approves();
        self.grade = Some(grade);
    }
}
