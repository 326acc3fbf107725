//! Trace utility execution with a wall-clock bound.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use super::{ProbeError, ProbeResult, TraceCommand};
use crate::config::JobConfig;

/// How long a terminated child gets to exit before it is killed.
const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Runs the trace utility against a target and captures its report.
#[derive(Debug, Clone)]
pub struct ProbeRunner {
    command: TraceCommand,
    timeout: Duration,
    grace: Duration,
}

impl ProbeRunner {
    pub fn new(command: TraceCommand, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            grace: DEFAULT_GRACE,
        }
    }

    /// Runner for the host's trace utility, bounded by the job config.
    pub fn for_host(config: &JobConfig) -> Self {
        Self::new(TraceCommand::for_host(config.probe_cycles), config.probe_timeout)
    }

    #[cfg(test)]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn command(&self) -> &TraceCommand {
        &self.command
    }

    /// Run one trace against `target`.
    ///
    /// Never fails outright: spawn errors, timeouts and non-zero exits are
    /// reported through `ProbeResult::error`. The child does not outlive
    /// this call.
    pub async fn run(&self, target: &str) -> ProbeResult {
        let program = &self.command.program;

        let mut child = match Command::new(program)
            .args(self.command.args_for(target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to start {} for {}: {}", program, target, e);
                return ProbeResult::failed(
                    ProbeError::Spawn {
                        program: program.clone(),
                        reason: e.to_string(),
                    },
                    None,
                );
            }
        };

        tracing::debug!("Started {} (pid {:?}) for {}", program, child.id(), target);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::time::timeout(self.timeout, async {
            let (status, out, err) =
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
            Ok::<_, std::io::Error>((status?, out?, err?))
        })
        .await;

        match outcome {
            Err(_) => {
                tracing::warn!(
                    "{} for {} exceeded {:?}, terminating",
                    program,
                    target,
                    self.timeout
                );
                terminate(&mut child, self.grace).await;
                ProbeResult::failed(ProbeError::Timeout(self.timeout), None)
            }
            Ok(Err(e)) => {
                terminate(&mut child, self.grace).await;
                ProbeResult::failed(ProbeError::Io(e.to_string()), None)
            }
            Ok(Ok((status, out, err))) => {
                let code = status.code();
                if status.success() {
                    let raw = String::from_utf8_lossy(&out).into_owned();
                    tracing::debug!("Raw output from {} for {}:\n{}", program, target, raw);
                    return ProbeResult::completed(raw, code.unwrap_or(0));
                }

                let stderr = String::from_utf8_lossy(&err).trim().to_string();
                let reason = if stderr.is_empty() {
                    format!("{} exited with {}", program, status)
                } else {
                    stderr
                };
                tracing::warn!("{} for {} failed: {}", program, target, reason);
                ProbeResult::failed(ProbeError::Command(reason), code)
            }
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Ask the child to exit, then kill it if it is still around after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    if send_terminate(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("Trace child exited after terminate: {}", status);
                return;
            }
            Ok(Err(e)) => tracing::warn!("Waiting for trace child failed: {}", e),
            Err(_) => tracing::warn!("Trace child ignored terminate, killing"),
        }
    }

    // kill() also reaps the child
    if let Err(e) = child.kill().await {
        tracing::error!("Failed to kill trace child: {}", e);
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        // Already reaped
        return false;
    };
    // SAFETY: pid is our own child and has not been reaped yet
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_terminate(_child: &Child) -> bool {
    false
}
