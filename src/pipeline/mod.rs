//! The stage FSM: transition rules, the driver loop and the transition graph.

pub mod driver;
pub mod graph;
pub mod transition;

pub use driver::{FailReason, HaltSignal, Pipeline, PipelineOptions, RunReport, RunStatus};
pub use graph::{render_dot, write_graph};
pub use transition::{
    decide, table_edges, FailureCounter, TransitionDecision, TransitionReason, FAILURE_CEILING,
};
