//! The artifact bundle threaded through the pipeline.
//!
//! Bundles are values: every stage receives one by value and hands back a
//! new one. The driver keeps superseded bundles in the run history.

use super::{Stage, StageOutcome};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Marker written into the artifact fields when generation produced nothing.
pub const GENERATION_ERROR_MARKER: &str = "Error while generating";

pub const CODE_FILE: &str = "myapp.py";
pub const CONTAINER_FILE: &str = "Dockerfile";
pub const MANIFEST_FILE: &str = "vibe.yaml";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSlot {
    Code,
    Container,
    Manifest,
    Requirements,
}

impl ArtifactSlot {
    pub const ALL: [Self; 4] = [
        Self::Code,
        Self::Container,
        Self::Manifest,
        Self::Requirements,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Container => "container",
            Self::Manifest => "manifest",
            Self::Requirements => "requirements",
        }
    }

    #[must_use]
    pub const fn default_file(&self) -> &'static str {
        match self {
            Self::Code => CODE_FILE,
            Self::Container => CONTAINER_FILE,
            Self::Manifest => MANIFEST_FILE,
            Self::Requirements => REQUIREMENTS_FILE,
        }
    }
}

impl fmt::Display for ArtifactSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub file: String,
    pub content: String,
}

impl ArtifactFile {
    #[must_use]
    pub fn new(file: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn empty(slot: ArtifactSlot) -> Self {
        Self::new(slot.default_file(), "")
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub code: ArtifactFile,
    pub container: ArtifactFile,
    pub manifest: ArtifactFile,
    pub requirements: ArtifactFile,
    /// Last stage applied; `None` before the first one.
    pub stage: Option<Stage>,
    pub result: StageOutcome,
    pub step: u32,
    pub logs: String,
    /// Number of repair attempts applied to this lineage of bundles.
    pub revision: u32,
}

impl Default for ArtifactBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactBundle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            code: ArtifactFile::empty(ArtifactSlot::Code),
            container: ArtifactFile::empty(ArtifactSlot::Container),
            manifest: ArtifactFile::empty(ArtifactSlot::Manifest),
            requirements: ArtifactFile::empty(ArtifactSlot::Requirements),
            stage: None,
            result: StageOutcome::Failed,
            step: 0,
            logs: String::new(),
            revision: 1,
        }
    }

    #[must_use]
    pub const fn slot(&self, slot: ArtifactSlot) -> &ArtifactFile {
        match slot {
            ArtifactSlot::Code => &self.code,
            ArtifactSlot::Container => &self.container,
            ArtifactSlot::Manifest => &self.manifest,
            ArtifactSlot::Requirements => &self.requirements,
        }
    }

    const fn slot_mut(&mut self, slot: ArtifactSlot) -> &mut ArtifactFile {
        match slot {
            ArtifactSlot::Code => &mut self.code,
            ArtifactSlot::Container => &mut self.container,
            ArtifactSlot::Manifest => &mut self.manifest,
            ArtifactSlot::Requirements => &mut self.requirements,
        }
    }

    #[must_use]
    pub fn with_content(mut self, slot: ArtifactSlot, content: impl Into<String>) -> Self {
        self.slot_mut(slot).content = content.into();
        self
    }

    #[must_use]
    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }

    /// Marks code, container and manifest as failed generations.
    #[must_use]
    pub fn with_generation_error(self) -> Self {
        self.with_content(ArtifactSlot::Code, GENERATION_ERROR_MARKER)
            .with_content(ArtifactSlot::Container, GENERATION_ERROR_MARKER)
            .with_content(ArtifactSlot::Manifest, GENERATION_ERROR_MARKER)
    }

    #[must_use]
    pub const fn with_revision_bump(mut self) -> Self {
        self.revision = self.revision.saturating_add(1);
        self
    }

    #[must_use]
    pub const fn stamped(mut self, stage: Stage, result: StageOutcome, step: u32) -> Self {
        self.stage = Some(stage);
        self.result = result;
        self.step = step;
        self
    }

    /// SHA-256 over the four artifact contents, in slot order.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for slot in ArtifactSlot::ALL {
            let artifact = self.slot(slot);
            hasher.update(artifact.file.as_bytes());
            hasher.update([0_u8]);
            hasher.update(artifact.content.as_bytes());
            hasher.update([0_u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}
