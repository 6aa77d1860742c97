#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{Result, VibeError};
use crate::types::Stage;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = ".kubevibe/config.toml";
pub const DEFAULT_MODEL: &str = "deepseek-r1:32b";
pub const DEFAULT_LLM_URL: &str = "http://localhost:11434";
pub const DEFAULT_IMAGE_REPO: &str = "satt70";
pub const DEFAULT_OUTPUT_ROOT: &str = "myto";
pub const DEFAULT_FEWSHOT_BANK: &str = "results/qwen3:14b";
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SETTLE_SECS: u64 = 10;

/// Environment variable and config-file key for every setting.
const SETTINGS: &[(&str, &str)] = &[
    ("MODEL", "model"),
    ("LLM_URL", "llm_url"),
    ("INTENT_METHOD", "intent_method"),
    ("IVAL_METHOD", "validation_method"),
    ("HANDS_FREE", "hands_free"),
    ("FIXFZERO", "fix_from_zero"),
    ("FIX_RESUME", "fix_resume"),
    ("TIMEOUT", "timeout"),
    ("N", "max_iterations"),
    ("GRAPH", "graph"),
    ("IMAGE_REPO", "image_repo"),
    ("OUTPUT_ROOT", "output_root"),
    ("FEWSHOT_BANK", "fewshot_bank"),
    ("FEWSHOT_DEPLOYMENTS", "fewshot_deployments"),
    ("TOOL_TIMEOUT", "tool_timeout"),
    ("SETTLE_SECS", "settle_secs"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntentMethod {
    #[default]
    None,
    CuratedZeroShot,
    CuratedFewShot,
    OnlyJsonFormat,
    JsonWithRequired,
}

impl IntentMethod {
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::CuratedZeroShot,
        Self::CuratedFewShot,
        Self::OnlyJsonFormat,
        Self::JsonWithRequired,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CuratedZeroShot => "curated-llm-zero-shot",
            Self::CuratedFewShot => "curated-llm-few-shot",
            Self::OnlyJsonFormat => "only-json-as-format",
            Self::JsonWithRequired => "json-with-required",
        }
    }

    /// # Errors
    ///
    /// Returns `Config` with a "did you mean" hint for unknown names.
    pub fn parse(raw: &str) -> Result<Self> {
        parse_named(raw, "INTENT_METHOD", &Self::ALL, Self::as_str)
    }
}

impl fmt::Display for IntentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMethod {
    #[default]
    None,
    LlmAsJudge,
}

impl ValidationMethod {
    pub const ALL: [Self; 2] = [Self::None, Self::LlmAsJudge];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LlmAsJudge => "llm-as-a-judge",
        }
    }

    /// # Errors
    ///
    /// Returns `Config` with a "did you mean" hint for unknown names.
    pub fn parse(raw: &str) -> Result<Self> {
        parse_named(raw, "IVAL_METHOD", &Self::ALL, Self::as_str)
    }
}

impl fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the pipeline resumes after a successful FIX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixResumePolicy {
    #[default]
    Build,
    Generate,
    FailedStage,
}

impl FixResumePolicy {
    pub const ALL: [Self; 3] = [Self::Build, Self::Generate, Self::FailedStage];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Generate => "generate",
            Self::FailedStage => "failed-stage",
        }
    }

    /// # Errors
    ///
    /// Returns `Config` with a "did you mean" hint for unknown names.
    pub fn parse(raw: &str) -> Result<Self> {
        parse_named(raw, "FIX_RESUME", &Self::ALL, Self::as_str)
    }

    /// Resume stage given the non-FIX stage that originally failed.
    #[must_use]
    pub const fn resume_stage(&self, failed: Option<Stage>) -> Stage {
        match (self, failed) {
            (Self::Generate, _) => Stage::Generate,
            (Self::FailedStage, Some(stage)) if !stage.is_terminal() => match stage {
                Stage::Fix => Stage::Build,
                other => other,
            },
            _ => Stage::Build,
        }
    }
}

impl fmt::Display for FixResumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub model: String,
    pub llm_url: String,
    pub intent_method: IntentMethod,
    pub validation_method: ValidationMethod,
    pub hands_free: bool,
    pub fix_resume: FixResumePolicy,
    pub timeout: Option<Duration>,
    pub max_iterations: Option<u32>,
    pub graph: bool,
    pub image_repo: String,
    pub output_root: PathBuf,
    pub fewshot_bank: PathBuf,
    pub fewshot_deployments: Vec<String>,
    pub tool_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            llm_url: DEFAULT_LLM_URL.to_string(),
            intent_method: IntentMethod::None,
            validation_method: ValidationMethod::None,
            hands_free: true,
            fix_resume: FixResumePolicy::Build,
            timeout: None,
            max_iterations: None,
            graph: false,
            image_repo: DEFAULT_IMAGE_REPO.to_string(),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            fewshot_bank: PathBuf::from(DEFAULT_FEWSHOT_BANK),
            fewshot_deployments: vec!["1".to_string()],
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            settle_delay: Duration::from_secs(DEFAULT_SETTLE_SECS),
        }
    }
}

impl RunConfig {
    /// Loads defaults, then the config file (if present), then the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` for unreadable files and invalid values.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let content = read_optional(&config_path).await?;
        Self::from_sources(content.as_deref(), non_empty_env_var)
    }

    /// Builds a config from file content and an environment lookup.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid values.
    pub fn from_sources<F>(file_content: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw = file_content.map(parse_config_content).unwrap_or_default();
        for (env_name, file_key) in SETTINGS {
            if let Some(value) = env(env_name) {
                raw.insert((*file_key).to_string(), value);
            }
        }
        Self::from_raw(&raw)
    }

    fn from_raw(raw: &BTreeMap<String, String>) -> Result<Self> {
        let get = |key: &str| raw.get(key).map(String::as_str);
        let mut config = Self::default();

        if let Some(model) = get("model") {
            config.model = model.to_string();
        }
        if let Some(url) = get("llm_url") {
            Url::parse(url)
                .map_err(|e| VibeError::Config(format!("LLM_URL '{url}' is not a URL: {e}")))?;
            config.llm_url = url.trim_end_matches('/').to_string();
        }
        if let Some(method) = get("intent_method") {
            config.intent_method = IntentMethod::parse(method)?;
        }
        if let Some(method) = get("validation_method") {
            config.validation_method = ValidationMethod::parse(method)?;
        }
        if let Some(flag) = get("hands_free") {
            config.hands_free = parse_flag("HANDS_FREE", flag)?;
        }
        if let Some(flag) = get("fix_from_zero") {
            if parse_flag("FIXFZERO", flag)? {
                config.fix_resume = FixResumePolicy::Generate;
            }
        }
        if let Some(policy) = get("fix_resume") {
            config.fix_resume = FixResumePolicy::parse(policy)?;
        }
        if let Some(secs) = get("timeout") {
            config.timeout = Some(Duration::from_secs(parse_number("TIMEOUT", secs)?));
        }
        if let Some(tries) = get("max_iterations") {
            let tries = parse_number("N", tries)?;
            config.max_iterations = Some(u32::try_from(tries).unwrap_or(u32::MAX));
        }
        if let Some(flag) = get("graph") {
            config.graph = parse_flag("GRAPH", flag)?;
        }
        if let Some(repo) = get("image_repo") {
            config.image_repo = repo.to_string();
        }
        if let Some(root) = get("output_root") {
            config.output_root = PathBuf::from(root);
        }
        if let Some(bank) = get("fewshot_bank") {
            config.fewshot_bank = PathBuf::from(bank);
        }
        if let Some(list) = get("fewshot_deployments") {
            let mut deployments = Vec::new();
            for name in list.split(',').map(str::trim) {
                push_unique(&mut deployments, (!name.is_empty()).then(|| name.to_string()));
            }
            config.fewshot_deployments = deployments;
        }
        if let Some(secs) = get("tool_timeout") {
            config.tool_timeout = Duration::from_secs(parse_number("TOOL_TIMEOUT", secs)?);
        }
        if let Some(secs) = get("settle_secs") {
            config.settle_delay = Duration::from_secs(parse_number("SETTLE_SECS", secs)?);
        }
        Ok(config)
    }

    /// `<output root>/<model>/<dd-mm-YYYY_HH_MM_SS>_output`
    #[must_use]
    pub fn run_dir(&self, started: chrono::DateTime<chrono::Local>) -> PathBuf {
        self.output_root
            .join(&self.model)
            .join(format!("{}_output", run_stamp(started)))
    }

    /// Human-readable parameter summary for the console and the run log.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut text = format!(
            "Parameters summary:\nUsing model for artifact generation: {}\nIntent extraction method: {}\nIntent validation method: {}\nHands free: {}\nFix resume: {}",
            self.model, self.intent_method, self.validation_method, self.hands_free, self.fix_resume
        );
        if let Some(timeout) = self.timeout {
            text.push_str(&format!("\nTimeout: {}", timeout.as_secs()));
        }
        if let Some(tries) = self.max_iterations {
            text.push_str(&format!("\nAttempts: {tries}"));
        }
        text
    }
}

#[must_use]
pub fn run_stamp(at: chrono::DateTime<chrono::Local>) -> String {
    at.format("%d-%m-%Y_%H_%M_%S").to_string()
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    tokio::fs::read_to_string(path)
        .await
        .map(Some)
        .map_err(|e| VibeError::Config(format!("Failed to read config: {e}")))
}

/// Parses `key = "value"` lines, skipping blanks and `#` comments.
#[must_use]
pub fn parse_config_content(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            SETTINGS.iter().find_map(|(_, key)| {
                parse_key_value(line, key).map(|value| ((*key).to_string(), expand_env_vars(value)))
            })
        })
        .collect()
}

pub fn parse_key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_once('=')
        .and_then(|(lhs, rhs)| (lhs.trim() == key).then_some(rhs.trim().trim_matches('"')))
}

fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Single left-to-right pass; substituted text is never rescanned.
fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_part = &rest[start + 2..start + end];
        let (var_name, default) = var_part.split_once(":-").unwrap_or((var_part, ""));
        result.push_str(&lookup(var_name).unwrap_or_else(|| default.to_string()));
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}

fn push_unique(target: &mut Vec<String>, value: Option<String>) {
    if let Some(candidate) = value {
        if !target.iter().any(|existing| existing == &candidate) {
            target.push(candidate);
        }
    }
}

fn non_empty_env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(VibeError::Config(format!(
            "{name} must be 0 or 1, got '{other}'"
        ))),
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| {
            VibeError::Config(format!(
                "{name} must be a non-negative integer, got '{raw}'"
            ))
        })
}

fn parse_named<T: Copy>(
    raw: &str,
    setting: &str,
    all: &[T],
    name: fn(&T) -> &'static str,
) -> Result<T> {
    let wanted = raw.trim();
    if let Some(found) = all.iter().find(|item| name(item).eq_ignore_ascii_case(wanted)) {
        return Ok(*found);
    }
    let suggestion = all
        .iter()
        .map(|item| (strsim::levenshtein(name(item), wanted), name(item)))
        .filter(|(distance, _)| *distance <= 3)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| format!(" Did you mean '{candidate}'?"))
        .unwrap_or_default();
    let valid = all.iter().map(name).collect::<Vec<_>>().join(", ");
    Err(VibeError::Config(format!(
        "Unknown {setting} '{wanted}'.{suggestion} Valid values: {valid}"
    )))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{
        expand_with, parse_config_content, parse_key_value, FixResumePolicy, IntentMethod,
        RunConfig, ValidationMethod,
    };
    use crate::types::Stage;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RunConfig::from_sources(None, env_of(&[])).unwrap();
        assert_eq!(config.model, "deepseek-r1:32b");
        assert_eq!(config.llm_url, "http://localhost:11434");
        assert_eq!(config.intent_method, IntentMethod::None);
        assert_eq!(config.validation_method, ValidationMethod::None);
        assert!(config.hands_free);
        assert_eq!(config.fix_resume, FixResumePolicy::Build);
        assert_eq!(config.timeout, None);
        assert_eq!(config.max_iterations, None);
        assert_eq!(config.image_repo, "satt70");
        assert_eq!(config.fewshot_deployments, vec!["1".to_string()]);
        assert_eq!(config.tool_timeout, Duration::from_secs(300));
    }

    #[test]
    fn environment_overrides_config_file() {
        let file = "model = \"qwen2.5:32b\"\ntimeout = \"600\"\n# comment\ngraph = \"1\"";
        let config = RunConfig::from_sources(
            Some(file),
            env_of(&[("MODEL", "gemma3:27b"), ("N", "25"), ("FIXFZERO", "1")]),
        )
        .unwrap();
        assert_eq!(config.model, "gemma3:27b");
        assert_eq!(config.timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.max_iterations, Some(25));
        assert!(config.graph);
        assert_eq!(config.fix_resume, FixResumePolicy::Generate);
    }

    #[test]
    fn unknown_method_suggests_closest_name() {
        let err = RunConfig::from_sources(None, env_of(&[("INTENT_METHOD", "json-with-requird")]))
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Did you mean 'json-with-required'"));
    }

    #[test]
    fn invalid_flag_and_url_are_rejected() {
        assert!(RunConfig::from_sources(None, env_of(&[("HANDS_FREE", "maybe")])).is_err());
        assert!(RunConfig::from_sources(None, env_of(&[("LLM_URL", "not a url")])).is_err());
    }

    #[test]
    fn fewshot_deployments_are_deduplicated() {
        let config =
            RunConfig::from_sources(None, env_of(&[("FEWSHOT_DEPLOYMENTS", "1, 2,1,,3")])).unwrap();
        assert_eq!(config.fewshot_deployments, vec!["1", "2", "3"]);
    }

    #[test]
    fn resume_policy_picks_stage() {
        assert_eq!(FixResumePolicy::Build.resume_stage(Some(Stage::Connect)), Stage::Build);
        assert_eq!(FixResumePolicy::Generate.resume_stage(Some(Stage::Connect)), Stage::Generate);
        assert_eq!(
            FixResumePolicy::FailedStage.resume_stage(Some(Stage::Connect)),
            Stage::Connect
        );
        assert_eq!(FixResumePolicy::FailedStage.resume_stage(None), Stage::Build);
    }

    #[test]
    fn env_references_expand_once_with_defaults() {
        let lookup = |name: &str| match name {
            "KV_SELF" => Some("${KV_SELF}".to_string()),
            "KV_HOST" => Some("cluster.test".to_string()),
            _ => None,
        };

        assert_eq!(expand_with("${KV_SELF}/x", lookup), "${KV_SELF}/x");
        assert_eq!(
            expand_with("http://${KV_HOST}:${KV_PORT:-11434}", lookup),
            "http://cluster.test:11434"
        );
        assert_eq!(expand_with("open ${KV_HOST", lookup), "open ${KV_HOST");
    }

    #[test]
    fn parse_key_value_handles_spaces_and_mismatch() {
        assert_eq!(parse_key_value("model = \"gemma3:27b\"", "model"), Some("gemma3:27b"));
        assert_eq!(parse_key_value("other = \"x\"", "model"), None);
        assert!(parse_config_content("unknown = \"1\"").is_empty());
    }
}
