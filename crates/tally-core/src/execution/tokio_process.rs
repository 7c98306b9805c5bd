use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::execution::{
    CommandSpec, ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput,
    ProcessSpawnRequest, ProcessWaitFuture, RunningProcess,
};
use crate::gateways::GatewayAction;
use crate::models::{LedgerError, LedgerErrorKind};

/// How long to keep reading pipes after the manager itself exited. Helpers
/// that brew or a post-install hook left behind may hold them open.
const PIPE_GRACE: Duration = Duration::from_millis(250);

/// How long to wait for the group to be reaped after SIGKILL.
const REAP_GRACE: Duration = Duration::from_secs(1);

/// Runs package-manager commands as tokio children. Each child leads its
/// own process group, so a timeout takes down everything it forked.
pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let command_line = request.command.command_line();
        let child = build_command(&request.command).spawn().map_err(|error| {
            execution_failure(
                &request.manager,
                request.action,
                format!("could not start `{command_line}`: {error}"),
            )
        })?;

        let pid = child.id();
        tracing::debug!(
            manager = %request.manager,
            action = request.action.as_str(),
            pid,
            command = %command_line,
            "started package manager process"
        );

        Ok(Box::new(ManagedChild {
            child: Mutex::new(child),
            pid,
            command_line,
            manager: request.manager,
            action: request.action,
            timeout: request.timeout,
            started_at: SystemTime::now(),
        }))
    }
}

fn build_command(spec: &CommandSpec) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    command
}

struct ManagedChild {
    child: Mutex<tokio::process::Child>,
    pid: Option<u32>,
    /// Rendered once so spawn, timeout and wait errors all name the same command.
    command_line: String,
    manager: String,
    action: GatewayAction,
    timeout: Option<Duration>,
    started_at: SystemTime,
}

impl RunningProcess for ManagedChild {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let ManagedChild {
            child,
            pid,
            command_line,
            manager,
            action,
            timeout,
            started_at,
        } = *self;

        Box::pin(async move {
            let mut child = child.into_inner().unwrap_or_else(PoisonError::into_inner);
            let stdout = drain(child.stdout.take());
            let stderr = drain(child.stderr.take());

            let exited = match timeout {
                Some(limit) => tokio::time::timeout(limit, child.wait())
                    .await
                    .map_err(|_| limit),
                None => Ok(child.wait().await),
            };

            let status = match exited {
                Ok(status) => status.map_err(|error| {
                    execution_failure(
                        &manager,
                        action,
                        format!("lost track of `{command_line}`: {error}"),
                    )
                })?,
                Err(limit) => {
                    kill_group(pid);
                    if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
                        tracing::warn!(pid, command = %command_line, "killed process group was not reaped");
                    }
                    stdout.abort();
                    stderr.abort();
                    return Err(LedgerError::new(
                        LedgerErrorKind::Timeout,
                        format!("`{command_line}` timed out after {}ms", limit.as_millis()),
                    )
                    .with_manager(manager));
                }
            };

            Ok(ProcessOutput {
                status: status
                    .code()
                    .map_or(ProcessExitStatus::Terminated, ProcessExitStatus::ExitCode),
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }
}

/// Reads a pipe to the end on its own task so a chatty child never blocks
/// on a full pipe while we wait for it.
fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe
            && let Err(error) = pipe.read_to_end(&mut buffer).await
        {
            tracing::debug!(%error, "package manager pipe closed early");
        }
        buffer
    })
}

async fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(PIPE_GRACE, reader).await {
        Ok(Ok(buffer)) => buffer,
        _ => Vec::new(),
    }
}

fn kill_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) only signals; the group was created by process_group(0).
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        tracing::warn!(pgid, "failed to signal timed out process group");
    }
}

fn execution_failure(manager: &str, action: GatewayAction, message: String) -> LedgerError {
    LedgerError::new(
        LedgerErrorKind::GatewayExecutionFailed,
        format!("{}: {message}", action.as_str()),
    )
    .with_manager(manager)
}
