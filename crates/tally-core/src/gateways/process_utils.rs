use crate::execution::{
    ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest, spawn_validated,
};
use crate::gateways::{ExecutedCommand, GatewayResult};
use crate::models::{LedgerError, LedgerErrorKind};

/// Runs a read-only command and returns its stdout. Must be called from a
/// thread that can block on the current tokio runtime.
pub(crate) fn run_and_collect_stdout(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> GatewayResult<String> {
    let manager = request.manager.clone();
    let action = request.action;

    let output = run_to_completion(executor, request)?;

    match output.status {
        ProcessExitStatus::ExitCode(0) => String::from_utf8(output.stdout).map_err(|error| {
            LedgerError::new(
                LedgerErrorKind::ParseFailure,
                format!("{} stdout is not valid UTF-8: {error}", action.as_str()),
            )
            .with_manager(manager)
        }),
        ProcessExitStatus::ExitCode(code) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(LedgerError::new(
                LedgerErrorKind::GatewayExecutionFailed,
                format!("{} exited with code {code}: {}", action.as_str(), stderr.trim()),
            )
            .with_manager(manager)
            .with_exit_code(code))
        }
        ProcessExitStatus::Terminated => Err(LedgerError::new(
            LedgerErrorKind::GatewayExecutionFailed,
            format!("{} was terminated by signal", action.as_str()),
        )
        .with_manager(manager)),
    }
}

/// Runs a mutating command and reports it together with the exact command line.
pub(crate) fn run_mutation(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutedCommand {
    let command_line = request.command.command_line();
    let manager = request.manager.clone();
    let action = request.action;

    match run_to_completion(executor, request) {
        Ok(output) => match output.status {
            ProcessExitStatus::ExitCode(0) => ExecutedCommand::succeeded(command_line),
            ProcessExitStatus::ExitCode(code) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let error = LedgerError::new(
                    LedgerErrorKind::GatewayExecutionFailed,
                    format!("{} exited with code {code}: {}", action.as_str(), stderr.trim()),
                )
                .with_manager(manager)
                .with_exit_code(code);
                ExecutedCommand::failed(command_line, Some(code), error)
            }
            ProcessExitStatus::Terminated => {
                let error = LedgerError::new(
                    LedgerErrorKind::GatewayExecutionFailed,
                    format!("{} was terminated by signal", action.as_str()),
                )
                .with_manager(manager);
                ExecutedCommand::failed(command_line, None, error)
            }
        },
        Err(error) => ExecutedCommand::failed(command_line, error.exit_code, error),
    }
}

fn run_to_completion(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> GatewayResult<ProcessOutput> {
    let process = spawn_validated(executor, request)?;
    let handle = tokio::runtime::Handle::current();
    handle.block_on(process.wait())
}
