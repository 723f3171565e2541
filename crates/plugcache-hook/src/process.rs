//! Runs the wrapped tool as a child process.

use crate::runner::{InvocationPhase, ToolInvocation, ToolOutcome, ToolRunner};
use async_trait::async_trait;
use plugcache_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

/// Spawns the tool on the host.
///
/// Warm-up output is captured and logged at debug level; the real command
/// inherits stdio so its output reaches the user unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn forward_lines<R>(reader: R, stream: &'static str) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(stream, "{}", line);
        }
    })
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome> {
        let start = std::time::Instant::now();
        let warm_up = matches!(invocation.phase, InvocationPhase::WarmUp { .. });

        info!(
            program = %invocation.program,
            args = ?invocation.args,
            working_dir = %invocation.working_dir.display(),
            "Running wrapped tool"
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if warm_up {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = command.spawn().map_err(|e| {
            Error::ToolFailed(format!("failed to spawn {}: {}", invocation.program, e))
        })?;

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward_lines(stderr, "stderr"));
        }

        let wait_result = match self.timeout {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "Wrapped tool timed out, killing process");
                    let _ = child.kill().await;
                    return Err(Error::ToolFailed(format!(
                        "{} timed out after {}s",
                        invocation.program,
                        limit.as_secs()
                    )));
                }
            },
            None => child.wait().await,
        };

        for forwarder in forwarders {
            let _ = forwarder.await;
        }

        let status = wait_result
            .map_err(|e| Error::ToolFailed(format!("failed to wait for {}: {}", invocation.program, e)))?;
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(exit_code, duration_ms, "Wrapped tool exited");

        Ok(ToolOutcome {
            exit_code,
            success: status.success(),
            duration_ms,
        })
    }
}
