use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline states. `Success` and `Fail` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Generate,
    Build,
    Validate,
    Deploy,
    Connect,
    Chart,
    Fix,
    Success,
    Fail,
}

impl Stage {
    pub const ALL: [Self; 9] = [
        Self::Generate,
        Self::Build,
        Self::Validate,
        Self::Deploy,
        Self::Connect,
        Self::Chart,
        Self::Success,
        Self::Fix,
        Self::Fail,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "GENERATE",
            Self::Build => "BUILD",
            Self::Validate => "VALIDATE",
            Self::Deploy => "DEPLOY",
            Self::Connect => "CONNECT",
            Self::Chart => "CHART",
            Self::Fix => "FIX",
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
        }
    }

    /// Happy-path successor. `Fix` has none of its own; where it resumes is a
    /// policy decision of the driver.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Generate => Some(Self::Build),
            Self::Build => Some(Self::Validate),
            Self::Validate => Some(Self::Deploy),
            Self::Deploy => Some(Self::Connect),
            Self::Connect => Some(Self::Chart),
            Self::Chart => Some(Self::Success),
            Self::Fix | Self::Success | Self::Fail => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }

    /// The handler that executes this stage, if it is not terminal.
    #[must_use]
    pub const fn kind(&self) -> Option<StageKind> {
        match self {
            Self::Generate => Some(StageKind::Generate),
            Self::Build => Some(StageKind::Build),
            Self::Validate => Some(StageKind::Validate),
            Self::Deploy => Some(StageKind::Deploy),
            Self::Connect => Some(StageKind::Connect),
            Self::Chart => Some(StageKind::Chart),
            Self::Fix => Some(StageKind::Fix),
            Self::Success | Self::Fail => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Stage {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown stage: {s}"))
    }
}

/// The seven executable stage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Generate,
    Build,
    Validate,
    Deploy,
    Connect,
    Chart,
    Fix,
}

impl StageKind {
    #[must_use]
    pub const fn stage(self) -> Stage {
        match self {
            Self::Generate => Stage::Generate,
            Self::Build => Stage::Build,
            Self::Validate => Stage::Validate,
            Self::Deploy => Stage::Deploy,
            Self::Connect => Stage::Connect,
            Self::Chart => Stage::Chart,
            Self::Fix => Stage::Fix,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stage())
    }
}

/// Result of applying one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Passed,
    #[default]
    Failed,
    /// Manual interrupt; bypasses the transition table.
    Halted,
}

impl StageOutcome {
    #[must_use]
    pub const fn from_success(success: bool) -> Self {
        if success {
            Self::Passed
        } else {
            Self::Failed
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Halted => "halted",
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Numeric form used in traces and graph labels: 1, 0, 2.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Passed => 1,
            Self::Failed => 0,
            Self::Halted => 2,
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Stage, StageKind, StageOutcome};

    #[test]
    fn stage_progression_and_string_roundtrip_work() {
        assert_eq!(Stage::Generate.next(), Some(Stage::Build));
        assert_eq!(Stage::Build.next(), Some(Stage::Validate));
        assert_eq!(Stage::Validate.next(), Some(Stage::Deploy));
        assert_eq!(Stage::Deploy.next(), Some(Stage::Connect));
        assert_eq!(Stage::Connect.next(), Some(Stage::Chart));
        assert_eq!(Stage::Chart.next(), Some(Stage::Success));
        assert_eq!(Stage::Fix.next(), None);
        assert_eq!(Stage::try_from("connect"), Ok(Stage::Connect));
        assert!(Stage::try_from("launch").is_err());
    }

    #[test]
    fn only_terminals_lack_a_handler() {
        for stage in Stage::ALL {
            assert_eq!(stage.kind().is_none(), stage.is_terminal(), "{stage}");
        }
        assert_eq!(StageKind::Fix.stage(), Stage::Fix);
    }

    #[test]
    fn outcome_codes_match_trace_convention() {
        assert_eq!(StageOutcome::Passed.code(), 1);
        assert_eq!(StageOutcome::Failed.code(), 0);
        assert_eq!(StageOutcome::Halted.code(), 2);
        assert!(StageOutcome::from_success(true).is_success());
        assert!(!StageOutcome::from_success(false).is_success());
    }
}
