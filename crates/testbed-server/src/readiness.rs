//! Readiness protocols.
//!
//! Servers expose no health endpoint, so readiness is read off their startup
//! logs. The marker text differs per generation; legacy servers also need a
//! status probe after their supervisor reports the service up.

use std::time::Duration;

use futures::StreamExt;
use testbed_common::error::Result;
use testbed_common::types::Generation;
use testbed_runtime::ContainerRuntime;
use testbed_runtime::logs::LineBuffer;

/// Logged by structured servers once they accept connections.
pub const STARTED_MARKER: &str = "iRODS server started successfully!";
/// Logged by structured servers that gave up starting.
pub const FAILED_MARKER: &str = "iRODS server failed to start.";
/// Logged by the legacy supervisor when its service process exits.
pub const LEGACY_EXITED_MARKER: &str = "exited: irods";
/// Present on a legacy exit line when the exit was a failure.
pub const LEGACY_UNEXPECTED_MARKER: &str = "not expected";
/// Printed by the legacy status command while the server is still down.
pub const LEGACY_NOT_RUNNING: &str = "No servers running";

/// Status command run inside legacy servers.
fn legacy_status_command() -> Vec<String> {
    [
        "su",
        "-",
        "irods",
        "-c",
        "/home/irods/iRODS/irodsctl --verbose status",
    ]
    .map(String::from)
    .to_vec()
}

/// Outcome of one start attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The server accepts queries.
    Ready,
    /// The server will not come up in this container.
    Failed,
}

/// What a single log line says about startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogVerdict {
    /// Startup finished.
    Ready,
    /// Startup failed.
    Failed,
    /// Log watching is over but the server must still pass a liveness probe.
    Probe,
}

/// Classifies a log line for the given generation.
#[must_use]
pub fn scan_line(generation: Generation, line: &str) -> Option<LogVerdict> {
    match generation {
        Generation::Legacy => line.contains(LEGACY_EXITED_MARKER).then(|| {
            if line.contains(LEGACY_UNEXPECTED_MARKER) {
                LogVerdict::Failed
            } else {
                LogVerdict::Probe
            }
        }),
        Generation::Structured => {
            if line.contains(STARTED_MARKER) {
                Some(LogVerdict::Ready)
            } else if line.contains(FAILED_MARKER) {
                Some(LogVerdict::Failed)
            } else {
                None
            }
        }
    }
}

/// Blocks until the server in `container` is ready or has failed.
///
/// There is no timeout here; callers bound the wait.
///
/// # Errors
///
/// Returns an error if the log stream or a liveness probe fails.
pub async fn wait_until_ready(
    runtime: &dyn ContainerRuntime,
    container: &str,
    generation: Generation,
    probe_interval: Duration,
) -> Result<Readiness> {
    tracing::info!(container, "waiting for server to have set up");
    match watch_logs(runtime, container, generation).await? {
        Some(LogVerdict::Ready) => Ok(Readiness::Ready),
        Some(LogVerdict::Probe) => {
            await_liveness(runtime, container, probe_interval).await?;
            Ok(Readiness::Ready)
        }
        Some(LogVerdict::Failed) => Ok(Readiness::Failed),
        None => {
            tracing::warn!(container, "log stream ended without a readiness marker");
            Ok(Readiness::Failed)
        }
    }
}

async fn watch_logs(
    runtime: &dyn ContainerRuntime,
    container: &str,
    generation: Generation,
) -> Result<Option<LogVerdict>> {
    let mut logs = runtime.logs(container);
    let mut buffer = LineBuffer::new();
    while let Some(chunk) = logs.next().await {
        for line in buffer.push(&chunk?) {
            tracing::debug!(container, "{line}");
            if let Some(verdict) = scan_line(generation, &line) {
                return Ok(Some(verdict));
            }
        }
    }
    Ok(buffer
        .finish()
        .and_then(|line| scan_line(generation, &line)))
}

/// Polls the status command until it stops reporting a stopped server.
async fn await_liveness(
    runtime: &dyn ContainerRuntime,
    container: &str,
    probe_interval: Duration,
) -> Result<()> {
    let command = legacy_status_command();
    loop {
        let output = runtime.exec(container, &command).await?;
        if !output.stdout.contains(LEGACY_NOT_RUNNING) {
            return Ok(());
        }
        tracing::info!(container, "still waiting on server setup");
        tokio::time::sleep(probe_interval).await;
    }
}
