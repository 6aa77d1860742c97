pub mod adapters;
pub mod config;
pub mod error;
pub mod intent;
pub mod manifest;
pub mod pipeline;
pub mod runlog;
pub mod schema;
pub mod stages;
pub mod timing;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::RunConfig;
pub use error::{Result, VibeError};
pub use intent::{IntentLoop, IntentOptions, IntentResolution};
pub use pipeline::{Pipeline, PipelineOptions, RunReport, RunStatus};
pub use types::*;
