//! Intent curation and judging ahead of the pipeline.
//!
//! The request is curated by the generation service, judged, and curated
//! again with the grade (and any operator clarification) as context until
//! the judge approves or the budget runs out.

pub mod curate;
pub mod few_shot;
pub mod judge;
pub mod machine;
pub mod normalize;
pub mod prompts;

pub use curate::{curate, curation_format, curation_prompt, curation_preset};
pub use few_shot::FewShotBank;
pub use judge::{judge, judge_prompt, offered_actions, parse_grade};
pub use machine::{
    ClarificationSource, IntentLoop, IntentOptions, IntentPhase, IntentReport, IntentResolution,
    ScriptedClarifications,
};
pub use normalize::{normalize_service_intent, outline_text, render_generator_prompt};
pub use prompts::{build_generation_context, build_validation_context, join_bullets, PresetName};
