mod bundle;
mod intent;
mod stage;
mod trace;

pub use bundle::{
    ArtifactBundle, ArtifactFile, ArtifactSlot, CODE_FILE, CONTAINER_FILE,
    GENERATION_ERROR_MARKER, MANIFEST_FILE, REQUIREMENTS_FILE,
};
pub use intent::{CoreIntent, Grade, IntentAnswer, LastTry, SuggestedAction};
pub use stage::{Stage, StageKind, StageOutcome};
pub use trace::{History, TraceEntry};
