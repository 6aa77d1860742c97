#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum VibeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("External tool failed: {0}")]
    ToolFailure(String),

    #[error("Connectivity failure: {0}")]
    ConnectivityFailure(String),

    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VibeError {
    /// Returns the error code printed with this error
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Schema(_) | Self::ManifestParse(_) => code::INVALID,
            Self::MalformedResponse(_) | Self::Serialization(_) | Self::Yaml(_) => code::INVALID,
            Self::ServiceUnavailable(_) | Self::Http(_) => code::UNAVAILABLE,
            Self::ToolFailure(_) | Self::ConnectivityFailure(_) | Self::Io(_) => code::DEPENDENCY,
            Self::InvalidTransition(_) => code::CONFLICT,
            Self::Timeout(_) => code::TIMEOUT,
            Self::Internal(_) => code::INTERNAL,
        }
    }

    /// Returns the exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::ServiceUnavailable(_) | Self::Http(_) => 3,
            Self::MalformedResponse(_) | Self::Serialization(_) | Self::Yaml(_) => 4,
            Self::ToolFailure(_) | Self::ConnectivityFailure(_) => 5,
            Self::ManifestParse(_) | Self::Schema(_) => 6,
            Self::InvalidTransition(_) => 7,
            Self::Timeout(_) => 8,
            Self::Io(_) => 9,
            Self::Internal(_) => 10,
        }
    }
}

/// Error codes with a description and a suggested fix.
pub const ERROR_CODES: &[(&str, &str, &str)] = &[
    (
        code::INVALID,
        "Invalid configuration or payload",
        "Check the environment overrides and the generated artifacts",
    ),
    (
        code::CONFLICT,
        "Conflicting state transition",
        "Inspect the run trace for the offending transition",
    ),
    (
        code::DEPENDENCY,
        "External tool or cluster failure",
        "Verify docker, kubectl and helm are installed and reachable",
    ),
    (
        code::TIMEOUT,
        "Operation timed out",
        "Increase TIMEOUT or TOOL_TIMEOUT and retry",
    ),
    (
        code::UNAVAILABLE,
        "Generation service unreachable",
        "Check LLM_URL and that the model is pulled",
    ),
    (
        code::INTERNAL,
        "Unexpected internal failure",
        "Inspect the run log and retry",
    ),
];

/// Get error code details (description and fix) for a given error code
#[must_use]
pub fn get_error_info(error_code: &str) -> Option<(&'static str, &'static str)> {
    ERROR_CODES
        .iter()
        .find(|(code, _, _)| *code == error_code)
        .map(|(_, desc, fix)| (*desc, *fix))
}

pub type Result<T> = std::result::Result<T, VibeError>;

#[cfg(test)]
mod tests {
    use super::{code, get_error_info, VibeError};

    #[test]
    fn config_errors_map_to_invalid_and_exit_two() {
        let err = VibeError::Config("unknown method".to_string());
        assert_eq!(err.code(), code::INVALID);
        assert_eq!(err.exit_code(), 2);
        assert!(get_error_info(err.code()).is_some());
        assert!(get_error_info("NOPE").is_none());
    }
}
