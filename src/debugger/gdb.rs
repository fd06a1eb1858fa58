//! GDB child process driven through the MI interpreter.
//!
//! The process is spawned with `--interpreter=mi2` and `kill_on_drop(true)`.
//! Console commands are wrapped as
//! `<token>-interpreter-exec console "<command>"`, so the debugger's own
//! command grammar still owns parsing while MI gives an unambiguous end of
//! output:
//!
//! - `<token>^done` / `^connected` followed by `(gdb)`: command finished.
//! - `<token>^error,msg="…"`: the debugger rejected the command.
//! - `<token>^running`: the target was resumed; the command finishes at the
//!   next `*stopped` record, however long that takes.
//!
//! Stopping a running target is done by sending `SIGINT` to the gdb process,
//! which is what a terminal Ctrl-C would do.

use std::process::Stdio;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, trace, warn};

use crate::config::GdbConfig;
use crate::debugger::mi::{self, AsyncKind, Record, ResultClass, StreamKind};
use crate::debugger::{Debugger, TargetStop};
use crate::{AppError, Result};

/// Maximum MI line length read from gdb: 4 MiB.
pub const MAX_MI_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Commands applied once the interpreter is ready.
const SETUP_COMMANDS: &[&str] = &["set pagination off", "set width 0", "set confirm off"];

/// A running gdb process.
#[derive(Debug)]
pub struct GdbProcess {
    /// Child handle; kept alive so `kill_on_drop` fires with this value.
    child: Child,
    stdin: ChildStdin,
    records: mpsc::Receiver<Record>,
    reader: JoinHandle<()>,
    next_token: u64,
    stopper: Arc<SignalStop>,
}

impl GdbProcess {
    /// Spawn gdb and wait for its first prompt.
    ///
    /// # Errors
    ///
    /// - `AppError::Debugger("failed to spawn gdb: …")`: OS spawn failure.
    /// - `AppError::Debugger("startup timeout …")`: no prompt in time.
    /// - `AppError::Debugger("gdb exited before its first prompt")`: early EOF.
    pub async fn spawn(config: &GdbConfig) -> Result<Self> {
        let mut child = Command::new(&config.program)
            .arg("--interpreter=mi2")
            .arg("--quiet")
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Debugger(format!("failed to spawn gdb '{}': {err}", config.program))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Debugger("failed to capture gdb stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Debugger("failed to capture gdb stdout".into()))?;

        let stopper = Arc::new(SignalStop { pid: child.id() });
        let (records_tx, records) = mpsc::channel(256);
        let reader = tokio::spawn(read_records(stdout, records_tx));

        let mut gdb = Self {
            child,
            stdin,
            records,
            reader,
            next_token: 0,
            stopper,
        };

        match tokio::time::timeout(config.startup_timeout(), gdb.wait_for_prompt()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => {
                gdb.child.kill().await.ok();
                return Err(AppError::Debugger(format!(
                    "startup timeout: gdb did not print a prompt within {:?}",
                    config.startup_timeout()
                )));
            }
        }

        for setup in SETUP_COMMANDS {
            if let Err(err) = gdb.run_command(setup).await {
                warn!(command = setup, %err, "gdb setup command failed");
            }
        }

        info!(pid = ?gdb.stopper.pid, program = %config.program, "gdb ready");
        Ok(gdb)
    }

    /// OS process id, if the process is still known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.stopper.pid
    }

    async fn wait_for_prompt(&mut self) -> Result<()> {
        loop {
            match self.records.recv().await {
                Some(Record::Prompt) => return Ok(()),
                Some(record) => trace!(?record, "gdb startup output"),
                None => {
                    return Err(AppError::Debugger(
                        "gdb exited before its first prompt".into(),
                    ))
                }
            }
        }
    }

    async fn run_command(&mut self, command: &str) -> Result<String> {
        self.next_token += 1;
        let token = self.next_token;
        let line = format!("{token}-interpreter-exec console {}\n", mi::quote(command));

        debug!(token, command, "sending command to gdb");
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| AppError::Debugger(format!("write to gdb failed: {err}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|err| AppError::Debugger(format!("write to gdb failed: {err}")))?;

        let mut output = String::new();
        let mut running = false;
        let mut finished: Option<Result<()>> = None;

        loop {
            let Some(record) = self.records.recv().await else {
                return Err(AppError::Debugger(
                    "gdb exited while executing a command".into(),
                ));
            };

            match record {
                Record::Stream {
                    kind: StreamKind::Console | StreamKind::Target,
                    text,
                } => output.push_str(&text),
                Record::Other(text) => {
                    output.push_str(&text);
                    output.push('\n');
                }
                Record::Result {
                    token: Some(t),
                    class,
                    results,
                } if t == token => match class {
                    ResultClass::Done | ResultClass::Connected => {
                        if !running {
                            finished = Some(Ok(()));
                        }
                    }
                    ResultClass::Running => running = true,
                    ResultClass::Error => {
                        let msg = mi::field(&results, "msg")
                            .unwrap_or_else(|| format!("gdb error: {results}"));
                        finished = Some(Err(AppError::Execution(msg)));
                    }
                    ResultClass::Exit => {
                        return Err(AppError::Debugger("gdb exited".into()));
                    }
                },
                Record::Async {
                    kind: AsyncKind::Exec,
                    class,
                    results,
                    ..
                } if running && class == "stopped" => {
                    // Not every gdb version follows `*stopped` with a prompt;
                    // a late one is skipped by the next command.
                    debug!(token, reason = ?mi::field(&results, "reason"), "target stopped");
                    return Ok(output);
                }
                Record::Prompt => {
                    if let Some(done) = finished.take() {
                        return done.map(|()| output);
                    }
                }
                other => trace!(token, record = ?other, "ignoring gdb record"),
            }
        }
    }
}

impl Debugger for GdbProcess {
    fn execute<'a>(
        &'a mut self,
        command: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.run_command(command))
    }

    fn stopper(&self) -> Arc<dyn TargetStop> {
        Arc::clone(&self.stopper) as Arc<dyn TargetStop>
    }
}

impl Drop for GdbProcess {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Stops the target by delivering `SIGINT` to the gdb process.
#[derive(Debug, Clone, Copy)]
pub struct SignalStop {
    pid: Option<u32>,
}

impl TargetStop for SignalStop {
    #[cfg(unix)]
    fn stop_target(&self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = self
            .pid
            .ok_or_else(|| AppError::Debugger("gdb process id unknown".into()))?;
        let pid = i32::try_from(pid)
            .map_err(|_| AppError::Debugger(format!("gdb process id {pid} out of range")))?;

        kill(Pid::from_raw(pid), Signal::SIGINT)
            .map_err(|err| AppError::Debugger(format!("failed to signal gdb: {err}")))?;
        info!(pid, "sent SIGINT to gdb");
        Ok(())
    }

    #[cfg(not(unix))]
    fn stop_target(&self) -> Result<()> {
        Err(AppError::Debugger(
            "stopping the target is not supported on this platform".into(),
        ))
    }
}

/// Reader task: parses gdb's stdout into [`Record`]s.
async fn read_records(stdout: ChildStdout, records_tx: mpsc::Sender<Record>) {
    let mut framed = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_MI_LINE_BYTES));

    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => {
                if records_tx.send(mi::parse_record(&line)).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "gdb output unreadable, stopping reader");
                break;
            }
        }
    }

    debug!("gdb stdout closed");
}
