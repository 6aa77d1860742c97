use super::{PortFuture, ToolOutput, ToolRunner};
use crate::error::{Result, VibeError};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

pub const MAX_TOOL_OUTPUT_CAPTURE_BYTES: usize = 1_048_576;

#[derive(Debug, Clone)]
pub struct StreamCapture {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

pub async fn capture_stream_limited<R>(mut stream: R, max_bytes: usize) -> Result<StreamCapture>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    let mut truncated = false;
    let mut chunk = [0_u8; 8_192];

    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(bytes.len());
        if remaining == 0 {
            truncated = true;
            continue;
        }

        let to_copy = remaining.min(read);
        bytes.extend_from_slice(&chunk[..to_copy]);
        if to_copy < read {
            truncated = true;
        }
    }

    Ok(StreamCapture { bytes, truncated })
}

/// Runs command lines through `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellToolRunner {
    timeout: Duration,
    max_capture: usize,
}

impl ShellToolRunner {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_capture: MAX_TOOL_OUTPUT_CAPTURE_BYTES,
        }
    }

    #[must_use]
    pub const fn with_max_capture(mut self, max_capture: usize) -> Self {
        self.max_capture = max_capture;
        self
    }

    async fn run_shell(&self, command: &str, workdir: &Path) -> Result<ToolOutput> {
        debug!(command, workdir = %workdir.display(), "running tool");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                VibeError::ToolFailure(format!("Failed to execute '{command}': {err}"))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| {
                VibeError::ToolFailure(format!("Failed to capture '{command}' stdout"))
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| {
                VibeError::ToolFailure(format!("Failed to capture '{command}' stderr"))
            })?;

        let max = self.max_capture;
        let stdout_task = tokio::spawn(async move { capture_stream_limited(stdout, max).await });
        let stderr_task = tokio::spawn(async move { capture_stream_limited(stderr, max).await });

        let status = if let Ok(wait_result) = tokio::time::timeout(self.timeout, child.wait()).await
        {
            wait_result?
        } else {
            let _ = child.kill().await;
            return Err(VibeError::Timeout(format!(
                "'{command}' did not finish within {}s",
                self.timeout.as_secs()
            )));
        };

        let join_err = |err: tokio::task::JoinError| {
            VibeError::Internal(format!("Failed to read '{command}' output: {err}"))
        };
        let stdout_capture = stdout_task.await.map_err(join_err)??;
        let stderr_capture = stderr_task.await.map_err(join_err)??;

        let mut output = String::from_utf8_lossy(&stdout_capture.bytes).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr_capture.bytes));

        Ok(ToolOutput {
            status: status.code().map_or(-1, |code| code),
            output,
            truncated: stdout_capture.truncated || stderr_capture.truncated,
        })
    }
}

impl ToolRunner for ShellToolRunner {
    fn run<'a>(&'a self, command: &'a str, workdir: &'a Path) -> PortFuture<'a, ToolOutput> {
        Box::pin(self.run_shell(command, workdir))
    }
}
