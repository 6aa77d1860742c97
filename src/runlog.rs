//! Append-only run log (`kubevibe.rawlog`).
//!
//! Every entry is a header line `--Log: <timestamp> --<context>--` followed by
//! the body. Stage sub-commands are collected as `--Internal:` segments first
//! and then appended as one entry.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const RUN_LOG_FILE: &str = "kubevibe.rawlog";

pub mod context {
    pub const CONTROL: &str = "control";
    pub const PHASE: &str = "phase";
    pub const BUNDLE: &str = "D";
    pub const INTENT_EXTRACTION: &str = "intent-extraction";
    pub const INTENT_VALIDATION: &str = "intent-validation";
    pub const CORE_INTENT: &str = "core-intent";
    pub const ARTIFACT_GENERATION: &str = "artifact-generation";
    pub const BUILD: &str = "build";
    pub const FIX: &str = "fix";
}

#[must_use]
pub fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

/// One sub-command's output, ready to be concatenated into stage logs.
#[must_use]
pub fn internal_segment(context: &str, body: &str) -> String {
    format!("--Internal: {} --{context}--\n{body}", timestamp())
}

#[derive(Debug, Clone)]
pub struct RunLog {
    path: Option<PathBuf>,
}

impl RunLog {
    /// Creates (truncating) the log file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be created.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::File::create(&path).await?;
        Ok(Self { path: Some(path) })
    }

    /// A log that drops every entry.
    #[must_use]
    pub const fn discard() -> Self {
        Self { path: None }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened or written.
    pub async fn append(&self, context: &str, body: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entry = format!("--Log: {} --{context}--\n{body}\n", timestamp());
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Appends and downgrades a write failure to a warning.
    ///
    /// Stage handlers use this so a full disk never turns into a stage
    /// verdict.
    pub async fn note(&self, context: &str, body: &str) {
        if let Err(err) = self.append(context, body).await {
            tracing::warn!(context, error = %err, "run log append failed");
        }
    }
}
