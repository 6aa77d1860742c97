//! Collaborator seams: subprocess tools, the generation service and the
//! network probe. Stage handlers only see these traits.

pub mod generation;
pub mod probe;
pub mod tool;

use crate::error::Result;
use crate::schema::ResponseFormat;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

pub use generation::{parse_json_object, HttpGenerationClient};
pub use probe::TcpPortProbe;
pub use tool::{capture_stream_limited, ShellToolRunner, StreamCapture};

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Timeout for artifact generation and repair calls.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);
/// Timeout for intent curation and judging calls.
pub const CURATION_TIMEOUT: Duration = Duration::from_secs(90);
/// Timeout for a single connectivity probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: i32,
    /// stdout followed by stderr.
    pub output: String,
    pub truncated: bool,
}

impl ToolOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs one literal command line in a working directory.
///
/// A nonzero exit is reported through `ToolOutput::status`, not as an error;
/// errors mean the command could not be run or timed out.
pub trait ToolRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a str, workdir: &'a Path) -> PortFuture<'a, ToolOutput>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub format: ResponseFormat,
    pub timeout: Duration,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>, format: ResponseFormat, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            format,
            timeout,
        }
    }
}

/// The external generation/judging service.
///
/// Returns the raw `response` text. When the request format demands JSON the
/// text is guaranteed to parse as JSON.
pub trait GenerationService: Send + Sync {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> PortFuture<'a, String>;
}

/// Short-timeout reachability check for `host:port`.
pub trait PortProbe: Send + Sync {
    fn probe<'a>(&'a self, host: &'a str, port: u16, timeout: Duration) -> PortFuture<'a, bool>;
}
