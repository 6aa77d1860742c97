#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{Result, VibeError};
use crate::types::{Stage, StageOutcome};
use serde::{Deserialize, Serialize};

/// Consecutive failures that force the run to `FAIL`.
pub const FAILURE_CEILING: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionReason {
    StagePassedAdvance,
    StagePassedComplete,
    StageFailedRepair,
    FixPassedResume,
    FixFailedRetry,
    FailureCeilingReached,
}

impl TransitionReason {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::StagePassedAdvance => "stage_passed_advance",
            Self::StagePassedComplete => "stage_passed_complete",
            Self::StageFailedRepair => "stage_failed_repair",
            Self::FixPassedResume => "fix_passed_resume",
            Self::FixFailedRetry => "fix_failed_retry",
            Self::FailureCeilingReached => "failure_ceiling_reached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDecision {
    to: Stage,
    reason: TransitionReason,
}

impl TransitionDecision {
    #[must_use]
    pub const fn new(to: Stage, reason: TransitionReason) -> Self {
        Self { to, reason }
    }

    #[must_use]
    pub const fn to(&self) -> Stage {
        self.to
    }

    #[must_use]
    pub const fn reason(&self) -> TransitionReason {
        self.reason
    }

    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        self.reason.code()
    }
}

/// Applies the transition table.
///
/// `resume` is where a successful `FIX` rejoins the happy path. A failed
/// `FIX` stays at `FIX`; the failure ceiling is the only way out of that
/// loop.
///
/// # Errors
///
/// Returns `InvalidTransition` for terminal stages, a halted outcome, or a
/// `resume` that is not an executable non-FIX stage.
pub fn decide(stage: Stage, outcome: StageOutcome, resume: Stage) -> Result<TransitionDecision> {
    if resume.is_terminal() || resume == Stage::Fix {
        return Err(VibeError::InvalidTransition(format!(
            "{resume} is not a resume stage"
        )));
    }
    let passed = match outcome {
        StageOutcome::Passed => true,
        StageOutcome::Failed => false,
        StageOutcome::Halted => {
            return Err(VibeError::InvalidTransition(
                "halted outcomes bypass the transition table".to_string(),
            ))
        }
    };

    match (stage, passed) {
        (Stage::Success | Stage::Fail, _) => Err(VibeError::InvalidTransition(format!(
            "{stage} is terminal"
        ))),
        (Stage::Fix, true) => Ok(TransitionDecision::new(
            resume,
            TransitionReason::FixPassedResume,
        )),
        (Stage::Fix, false) => Ok(TransitionDecision::new(
            Stage::Fix,
            TransitionReason::FixFailedRetry,
        )),
        (_, false) => Ok(TransitionDecision::new(
            Stage::Fix,
            TransitionReason::StageFailedRepair,
        )),
        (_, true) => match stage.next() {
            Some(Stage::Success) => Ok(TransitionDecision::new(
                Stage::Success,
                TransitionReason::StagePassedComplete,
            )),
            Some(next) => Ok(TransitionDecision::new(
                next,
                TransitionReason::StagePassedAdvance,
            )),
            None => Err(VibeError::InvalidTransition(format!(
                "{stage} has no successor"
            ))),
        },
    }
}

/// Every edge of the table for a given resume stage, as
/// `(from, outcome code, to)`.
#[must_use]
pub fn table_edges(resume: Stage) -> Vec<(Stage, u8, Stage)> {
    Stage::ALL
        .into_iter()
        .filter(|stage| !stage.is_terminal())
        .flat_map(|stage| {
            [StageOutcome::Passed, StageOutcome::Failed]
                .into_iter()
                .filter_map(move |outcome| {
                    decide(stage, outcome, resume)
                        .ok()
                        .map(|decision| (stage, outcome.code(), decision.to()))
                })
        })
        .collect()
}

/// Consecutive failures across stages, FIX included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailureCounter {
    consecutive: u32,
}

impl FailureCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { consecutive: 0 }
    }

    #[must_use]
    pub const fn record(self, outcome: StageOutcome) -> Self {
        match outcome {
            StageOutcome::Passed => Self { consecutive: 0 },
            StageOutcome::Failed => Self {
                consecutive: self.consecutive.saturating_add(1),
            },
            StageOutcome::Halted => self,
        }
    }

    #[must_use]
    pub const fn consecutive(&self) -> u32 {
        self.consecutive
    }

    #[must_use]
    pub const fn reached_ceiling(&self) -> bool {
        self.consecutive >= FAILURE_CEILING
    }
}
