//! Host shell command execution.
//!
//! The command line is split on whitespace and run directly, without a
//! shell in between, so no globbing, pipes or quoting apply. The child is
//! spawned with `kill_on_drop(true)`: dropping the returned future (which is
//! how an interrupt cancels it) kills the process.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::{AppError, Result};

/// Run `command_line` and capture its combined output.
///
/// Output is stdout followed by stderr.
///
/// # Errors
///
/// - `AppError::Execution("empty shell command")`: nothing to run.
/// - `AppError::Execution("failed to run …")`: the program could not start.
/// - `AppError::Execution("… exited with …")`: non-zero exit; the message
///   carries the captured output and the exit status.
pub async fn run(command_line: &str) -> Result<String> {
    let mut argv = command_line.split_whitespace();
    let Some(program) = argv.next() else {
        return Err(AppError::Execution("empty shell command".into()));
    };

    debug!(command = command_line, "running shell command");

    let output = Command::new(program)
        .args(argv)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| AppError::Execution(format!("failed to run '{program}': {err}")))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(combined)
    } else {
        let status = output
            .status
            .code()
            .map_or_else(|| "a signal".to_owned(), |code| format!("status {code}"));
        Err(AppError::Execution(format!(
            "{combined}'{program}' exited with {status}"
        )))
    }
}
