use super::curate::curate;
use super::few_shot::FewShotBank;
use super::judge::judge;
use super::normalize::{outline_text, render_generator_prompt};
use crate::adapters::{GenerationService, PortFuture};
use crate::config::{IntentMethod, RunConfig, ValidationMethod};
use crate::error::{Result, VibeError};
use crate::runlog::{context, RunLog};
use crate::timing::Stopwatch;
use crate::types::{CoreIntent, Grade, IntentAnswer, SuggestedAction};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentPhase {
    Curate,
    Judge,
    /// Suspended on a judge question; only `provide_clarification` resumes.
    AwaitingClarification,
    Approved,
    /// Time or attempt budget ran out before approval.
    Exhausted,
}

impl IntentPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Curate => "curate",
            Self::Judge => "judge",
            Self::AwaitingClarification => "awaiting-clarification",
            Self::Approved => "approved",
            Self::Exhausted => "exhausted",
        }
    }

    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Approved | Self::Exhausted)
    }
}

impl fmt::Display for IntentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntentOptions {
    pub method: IntentMethod,
    pub validation: ValidationMethod,
    pub hands_free: bool,
    pub timeout: Option<Duration>,
    pub max_iterations: Option<u32>,
}

impl From<&RunConfig> for IntentOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            method: config.intent_method,
            validation: config.validation_method,
            hands_free: config.hands_free,
            timeout: config.timeout,
            max_iterations: config.max_iterations,
        }
    }
}

/// Answers judge questions on behalf of the operator.
pub trait ClarificationSource: Send {
    fn answer<'a>(&'a mut self, question: &'a str) -> PortFuture<'a, String>;
}

/// Replays canned answers and remembers the questions asked.
#[derive(Debug, Clone, Default)]
pub struct ScriptedClarifications {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl ScriptedClarifications {
    #[must_use]
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }

    #[must_use]
    pub fn asked(&self) -> &[String] {
        &self.asked
    }
}

impl ClarificationSource for ScriptedClarifications {
    fn answer<'a>(&'a mut self, question: &'a str) -> PortFuture<'a, String> {
        Box::pin(async move {
            self.asked.push(question.to_string());
            self.answers
                .pop_front()
                .ok_or_else(|| VibeError::Internal("no scripted clarification left".to_string()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentResolution {
    /// Intent text handed to artifact generation.
    Approved(String),
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct IntentReport {
    pub resolution: IntentResolution,
    pub core: CoreIntent,
    /// Wall-clock time minus operator waits.
    pub elapsed: Duration,
    pub waited: Duration,
    pub iterations: u32,
}

/// Curate/judge loop over one request, with an explicit suspend point for
/// operator clarifications.
pub struct IntentLoop {
    core: CoreIntent,
    phase: IntentPhase,
    options: IntentOptions,
    generation: Arc<dyn GenerationService>,
    few_shot: FewShotBank,
    log: RunLog,
    clock: Stopwatch,
    waited: Duration,
    completed: u32,
    /// Grade carrying the question while awaiting clarification.
    pending: Option<Grade>,
}

impl fmt::Debug for IntentLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntentLoop")
            .field("phase", &self.phase)
            .field("options", &self.options)
            .field("iteration", &self.core.iteration)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl IntentLoop {
    #[must_use]
    pub fn new(
        request: impl Into<String>,
        options: IntentOptions,
        generation: Arc<dyn GenerationService>,
        few_shot: FewShotBank,
        log: RunLog,
    ) -> Self {
        Self {
            core: CoreIntent::new(request),
            phase: IntentPhase::Curate,
            options,
            generation,
            few_shot,
            log,
            clock: Stopwatch::start(),
            waited: Duration::ZERO,
            completed: 0,
            pending: None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> IntentPhase {
        self.phase
    }

    #[must_use]
    pub const fn core(&self) -> &CoreIntent {
        &self.core
    }

    /// Question the judge is waiting on, if suspended.
    #[must_use]
    pub fn pending_question(&self) -> Option<&str> {
        self.pending
            .as_ref()
            .and_then(|grade| grade.clarification_question.as_deref())
    }

    fn budget_spent(&self) -> bool {
        self.clock.exceeded(self.options.timeout)
            || self
                .options
                .max_iterations
                .is_some_and(|max| self.completed >= max)
    }

    /// Ends the current iteration without approval.
    fn close_iteration(&mut self) {
        self.completed += 1;
        self.phase = IntentPhase::Curate;
    }

    /// Performs one phase and returns the phase the loop is in afterwards.
    ///
    /// Service failures and malformed answers close the iteration and send
    /// the loop back to `Curate`. Suspended and final phases are returned
    /// unchanged.
    pub async fn step(&mut self) -> IntentPhase {
        match self.phase {
            IntentPhase::Curate => self.curate_step().await,
            IntentPhase::Judge => self.judge_step().await,
            IntentPhase::AwaitingClarification
            | IntentPhase::Approved
            | IntentPhase::Exhausted => {}
        }
        self.phase
    }

    async fn curate_step(&mut self) {
        if self.budget_spent() {
            warn!(iterations = self.completed, "intent budget exhausted");
            self.log
                .note(
                    context::CONTROL,
                    &format!(
                        "Intent extraction stopped after {} seconds and {} tries",
                        self.clock.counted().as_secs(),
                        self.completed
                    ),
                )
                .await;
            self.phase = IntentPhase::Exhausted;
            return;
        }

        let iteration = self.completed;
        self.core.begin_iteration(iteration);
        self.log
            .note(
                context::INTENT_EXTRACTION,
                &format!("Intent extraction lap {iteration}"),
            )
            .await;
        let snapshot = serde_json::to_string_pretty(&self.core).unwrap_or_default();
        self.log
            .note(
                context::CORE_INTENT,
                &format!("Core intent status [{iteration}]:\n{snapshot}"),
            )
            .await;

        match curate(
            &self.core,
            self.options.method,
            self.generation.as_ref(),
            &self.log,
        )
        .await
        {
            Ok(answer) => {
                self.core.answer = answer;
                self.phase = IntentPhase::Judge;
            }
            Err(err) => {
                warn!(error = %err, iteration, "curation failed");
                self.log
                    .note(context::INTENT_EXTRACTION, &format!("Curation failed: {err}"))
                    .await;
                self.close_iteration();
            }
        }
    }

    async fn judge_step(&mut self) {
        let verdict = judge(
            &self.core,
            self.options.validation,
            self.options.hands_free,
            self.generation.as_ref(),
            &self.log,
        )
        .await;
        match verdict {
            Ok(grade) if grade.suggested_action == SuggestedAction::Ask => {
                info!(iteration = self.core.iteration, "judge asks for clarification");
                self.pending = Some(grade);
                self.phase = IntentPhase::AwaitingClarification;
            }
            Ok(grade) => {
                self.core.record_grade(grade);
                if self.core.valid {
                    self.completed += 1;
                    self.phase = IntentPhase::Approved;
                } else {
                    self.close_iteration();
                }
            }
            Err(err) => {
                warn!(error = %err, iteration = self.core.iteration, "judging failed");
                self.log
                    .note(context::INTENT_VALIDATION, &format!("Validation failed: {err}"))
                    .await;
                self.close_iteration();
            }
        }
    }

    /// Attaches the operator's answer to the pending question and resumes
    /// curation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the loop is awaiting clarification.
    pub fn provide_clarification(&mut self, answer: impl Into<String>) -> Result<()> {
        if self.phase != IntentPhase::AwaitingClarification {
            return Err(VibeError::InvalidTransition(format!(
                "clarification provided while in {}",
                self.phase
            )));
        }
        let Some(mut grade) = self.pending.take() else {
            return Err(VibeError::Internal(
                "awaiting clarification without a pending grade".to_string(),
            ));
        };
        grade.clarification_answer = Some(answer.into());
        self.core.record_grade(grade);
        self.close_iteration();
        Ok(())
    }

    /// Intent text for the approved answer, per curation method.
    pub async fn final_text(&self) -> String {
        match (&self.options.method, &self.core.answer) {
            (IntentMethod::None, _) | (_, IntentAnswer::Unset) => self.core.request().to_string(),
            (IntentMethod::CuratedFewShot, answer) => {
                self.few_shot.charge(&answer.display_text(), &self.log).await
            }
            (IntentMethod::JsonWithRequired, IntentAnswer::Structured(value)) => {
                render_generator_prompt(value)
            }
            (IntentMethod::OnlyJsonFormat, IntentAnswer::Structured(value)) => outline_text(value),
            (_, answer) => answer.display_text(),
        }
    }

    /// Steps until approval or exhaustion, asking `source` whenever the judge
    /// needs an answer. Time spent waiting on `source` is not counted.
    ///
    /// # Errors
    ///
    /// Propagates a failure of `source` to produce an answer.
    pub async fn run_to_completion(
        &mut self,
        source: &mut dyn ClarificationSource,
    ) -> Result<IntentReport> {
        info!(
            method = self.options.method.as_str(),
            validation = self.options.validation.as_str(),
            "intent extraction started"
        );
        self.log
            .note(
                context::INTENT_EXTRACTION,
                &format!("Received intent: {}", self.core.request()),
            )
            .await;

        loop {
            let phase = self.step().await;
            if phase.is_final() {
                break;
            }
            if phase == IntentPhase::AwaitingClarification {
                let question = self.pending_question().unwrap_or_default().to_string();
                let asked_at = Instant::now();
                let answer = source.answer(&question).await?;
                let waited = asked_at.elapsed();
                self.clock.exclude(waited);
                self.waited += waited;
                self.provide_clarification(answer)?;
            }
        }

        let resolution = if self.phase == IntentPhase::Approved {
            let text = self.final_text().await;
            IntentResolution::Approved(text)
        } else {
            IntentResolution::Exhausted
        };
        let snapshot = serde_json::to_string_pretty(&self.core).unwrap_or_default();
        self.log
            .note(context::CORE_INTENT, &format!("Core intent status:\n{snapshot}"))
            .await;
        info!(
            phase = %self.phase,
            iterations = self.completed,
            elapsed_secs = self.clock.counted().as_secs(),
            "intent extraction finished"
        );

        Ok(IntentReport {
            resolution,
            core: self.core.clone(),
            elapsed: self.clock.counted(),
            waited: self.waited,
            iterations: self.completed,
        })
    }
}
