use super::{PortFuture, PortProbe};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Reachability by TCP connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    fn probe<'a>(&'a self, host: &'a str, port: u16, timeout: Duration) -> PortFuture<'a, bool> {
        Box::pin(async move {
            let reached = matches!(
                tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
                Ok(Ok(_))
            );
            debug!(host, port, reached, "port probe");
            Ok(reached)
        })
    }
}
