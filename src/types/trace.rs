use super::{ArtifactBundle, Stage, StageOutcome};
use rpds::VectorSync;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One FSM transition, as recorded by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step: u32,
    pub from: Stage,
    pub result: StageOutcome,
    pub to: Stage,
}

impl TraceEntry {
    #[must_use]
    pub const fn new(step: u32, from: Stage, result: StageOutcome, to: Stage) -> Self {
        Self {
            step,
            from,
            result,
            to,
        }
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}) -> {}",
            self.step,
            self.from,
            self.result.code(),
            self.to
        )
    }
}

/// Append-only record of a run: every superseded bundle and every transition.
///
/// Appending returns a new `History` sharing structure with the old one, so
/// snapshots handed out earlier never change.
#[derive(Debug, Clone, Default)]
pub struct History {
    bundles: VectorSync<ArtifactBundle>,
    trace: VectorSync<TraceEntry>,
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bundles: VectorSync::new_sync(),
            trace: VectorSync::new_sync(),
        }
    }

    #[must_use]
    pub fn with_bundle(&self, bundle: ArtifactBundle) -> Self {
        Self {
            bundles: self.bundles.push_back(bundle),
            trace: self.trace.clone(),
        }
    }

    #[must_use]
    pub fn with_entry(&self, entry: TraceEntry) -> Self {
        Self {
            bundles: self.bundles.clone(),
            trace: self.trace.push_back(entry),
        }
    }

    pub fn bundles(&self) -> impl Iterator<Item = &ArtifactBundle> {
        self.bundles.iter()
    }

    pub fn trace(&self) -> impl Iterator<Item = &TraceEntry> {
        self.trace.iter()
    }

    #[must_use]
    pub fn trace_vec(&self) -> Vec<TraceEntry> {
        self.trace.iter().copied().collect()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&ArtifactBundle> {
        self.bundles.last()
    }

    #[must_use]
    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    #[must_use]
    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }
}
