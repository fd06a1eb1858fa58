//! Execution queue and its single worker.
//!
//! Every connection enqueues [`Job`]s through a cloned [`QueueHandle`]; one
//! worker task dequeues them in arrival order and runs them against the
//! [`Dispatcher`], which it owns outright. That ownership is the whole
//! serialization story: there is no lock around the debugger because no
//! other task can reach it.
//!
//! Interrupts travel on their own channel so they never wait behind queued
//! jobs. The worker selects on that channel while a job runs:
//!
//! - debugger and handler routes: ask the debugger to stop the target and
//!   keep waiting for the command to return;
//! - shell routes: drop the execution, which kills the child process.
//!
//! Either way the job's response reports `interrupted`. A signal names the
//! call it targets; one that arrives after that call finished is ignored.
//!
//! Neither the worker nor the read loops ever wait on a peer's socket:
//! responses go through [`deliver`], which discards them when the peer has
//! stopped reading.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::debugger::TargetStop;
use crate::models::{CallId, Outcome, Response};
use crate::server::dispatch::{Dispatcher, Route};
use crate::{AppError, Result};

/// How the result of a job is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    /// The caller is blocked on this job's response.
    Call,
    /// The caller was already acknowledged; the response is the completion.
    Post,
}

/// One unit of work for the execution worker.
#[derive(Debug)]
pub struct Job {
    /// Correlation id of the originating request.
    pub call_id: CallId,
    /// Command payload.
    pub command: String,
    /// Delivery mode.
    pub mode: JobMode,
    /// Outbound channel of the originating connection.
    pub reply: mpsc::Sender<Response>,
    /// Peer address, for logs.
    pub peer: String,
}

/// Cloneable producer side of the execution queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    jobs: mpsc::Sender<Job>,
    interrupts: mpsc::UnboundedSender<CallId>,
    current: Arc<Mutex<Option<CallId>>>,
}

impl QueueHandle {
    /// Wait for room in the queue.
    ///
    /// The returned permit enqueues exactly one job. Waiting here is
    /// cancel-safe, so callers can `select!` it against other work.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionClosed` if the worker has shut down.
    pub async fn reserve(&self) -> Result<mpsc::Permit<'_, Job>> {
        self.jobs
            .reserve()
            .await
            .map_err(|_| AppError::ConnectionClosed("execution queue is shut down".into()))
    }

    /// Interrupt whatever the worker is executing.
    ///
    /// Returns the id of the interrupted call, or `None` if the worker was
    /// idle. Nothing is signalled in that case.
    pub fn interrupt(&self) -> Option<CallId> {
        let current = self.current()?;
        self.interrupt_call(current);
        Some(current)
    }

    /// Signal the worker to interrupt `call_id`.
    ///
    /// The worker ignores the signal unless `call_id` is still executing
    /// when it sees it.
    pub fn interrupt_call(&self, call_id: CallId) {
        if self.interrupts.send(call_id).is_err() {
            warn!(%call_id, "interrupt dropped: execution worker is gone");
        }
    }

    /// Id of the call currently executing, if any.
    #[must_use]
    pub fn current(&self) -> Option<CallId> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of jobs waiting behind the current one.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.jobs.max_capacity() - self.jobs.capacity()
    }
}

/// Spawn the execution worker.
///
/// The returned [`JoinHandle`] yields the dispatcher back once the worker
/// stops (on `cancel` or when every [`QueueHandle`] is dropped).
#[must_use]
pub fn spawn_worker(
    dispatcher: Dispatcher,
    capacity: usize,
    cancel: CancellationToken,
) -> (QueueHandle, JoinHandle<Dispatcher>) {
    let (jobs_tx, jobs_rx) = mpsc::channel(capacity.max(1));
    let (interrupts_tx, interrupts_rx) = mpsc::unbounded_channel();
    let current = Arc::new(Mutex::new(None));

    let handle = QueueHandle {
        jobs: jobs_tx,
        interrupts: interrupts_tx,
        current: Arc::clone(&current),
    };

    let worker = Worker {
        stopper: dispatcher.stopper(),
        dispatcher,
        jobs: jobs_rx,
        interrupts: interrupts_rx,
        current,
        cancel,
    };

    let task = tokio::spawn(worker.run().instrument(info_span!("execution_worker")));
    (handle, task)
}

struct Worker {
    dispatcher: Dispatcher,
    stopper: Arc<dyn TargetStop>,
    jobs: mpsc::Receiver<Job>,
    interrupts: mpsc::UnboundedReceiver<CallId>,
    current: Arc<Mutex<Option<CallId>>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) -> Dispatcher {
        info!("execution worker started");

        loop {
            let job = tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            self.set_current(Some(job.call_id));
            let outcome = self.execute(&job).await;
            self.set_current(None);

            let Some(outcome) = outcome else {
                info!(call_id = %job.call_id, "execution abandoned for shutdown");
                break;
            };

            let response = Response {
                id: job.call_id,
                outcome,
            };
            deliver(&job.reply, response, &job.peer);
        }

        info!("execution worker stopped");
        self.dispatcher
    }

    /// Run one job; `None` means shutdown cut it short.
    async fn execute(&mut self, job: &Job) -> Option<Outcome> {
        let route = Route::parse(&job.command);
        let controls_target = route.controls_target();
        let stopper = Arc::clone(&self.stopper);
        let started = tokio::time::Instant::now();

        info!(call_id = %job.call_id, peer = %job.peer, mode = ?job.mode, command = %job.command, "executing");

        let mut interrupted = false;
        let execution = AssertUnwindSafe(self.dispatcher.dispatch(route)).catch_unwind();
        tokio::pin!(execution);

        let result = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    if controls_target {
                        if let Err(err) = stopper.stop_target() {
                            warn!(call_id = %job.call_id, %err, "failed to stop target for shutdown");
                        }
                    }
                    return None;
                }

                Some(target) = self.interrupts.recv() => {
                    if target != job.call_id {
                        debug!(%target, "ignoring interrupt for a call that already finished");
                        continue;
                    }
                    info!(call_id = %job.call_id, "interrupt received");
                    interrupted = true;
                    if !controls_target {
                        break Err(AppError::Interrupted("shell command killed".into()));
                    }
                    if let Err(err) = stopper.stop_target() {
                        warn!(call_id = %job.call_id, %err, "failed to stop target");
                    }
                }

                result = &mut execution => {
                    break result.unwrap_or_else(|panic| {
                        Err(AppError::Execution(format!(
                            "command panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    });
                }
            }
        };

        let result = match result {
            Err(AppError::Interrupted(msg)) => Err(AppError::Interrupted(msg)),
            _ if interrupted => Err(AppError::Interrupted(format!(
                "command '{}' was interrupted",
                job.command
            ))),
            other => other,
        };

        info!(
            call_id = %job.call_id,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "execution finished"
        );

        Some(Outcome::from_result(result))
    }

    fn set_current(&self, call_id: Option<CallId>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = call_id;
    }
}

/// Hand `response` to a connection's writer without waiting.
///
/// A full channel means the peer stopped reading its socket; the response
/// is discarded. Returns whether the response was queued.
pub(crate) fn deliver(reply: &mpsc::Sender<Response>, response: Response, peer: &str) -> bool {
    let call_id = response.id;
    match reply.try_send(response) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(%call_id, peer, "peer is not reading its socket, discarding response");
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!(%call_id, peer, "connection closed before its response was sent, discarding");
            false
        }
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}
