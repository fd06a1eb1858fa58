//! RPC client.
//!
//! A [`Client`] owns one TCP connection plus two background tasks: a writer
//! fed through an `mpsc` channel and a reader that routes each incoming
//! [`Response`] to the caller waiting on its [`CallId`]. All methods take
//! `&self`, so a client wrapped in an `Arc` can be shared by many tasks and
//! their calls interleave on the wire; responses still reach the right
//! caller because they are matched by id, never by order.

pub mod pending;

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::client::pending::{flatten, PendingCalls, PostHandle};
use crate::config::ClientConfig;
use crate::models::{CallId, Outcome, Request, RequestBody, Response};
use crate::transport::codec::FrameCodec;
use crate::transport::writer::run_writer;
use crate::{AppError, Result};

/// Requests buffered before callers wait on the socket.
const OUTBOUND_CAPACITY: usize = 64;

/// Connection to a gdbrpc server.
#[derive(Debug)]
pub struct Client {
    peer: SocketAddr,
    call_timeout: Duration,
    outbound: Mutex<Option<mpsc::Sender<Request>>>,
    pending: PendingCalls,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Connect to `config.host:config.port`.
    ///
    /// # Errors
    ///
    /// - `AppError::ConnectionRefused`: nothing listening.
    /// - `AppError::ConnectionTimedOut`: no answer within
    ///   `connect_timeout_seconds`.
    /// - `AppError::Connection`: resolution or any other socket failure.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = match tokio::time::timeout(
            config.connect_timeout(),
            TcpStream::connect(&addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) if err.kind() == ErrorKind::ConnectionRefused => {
                return Err(AppError::ConnectionRefused(format!("{addr}: {err}")));
            }
            Ok(Err(err)) if err.kind() == ErrorKind::TimedOut => {
                return Err(AppError::ConnectionTimedOut(format!("{addr}: {err}")));
            }
            Ok(Err(err)) => {
                return Err(AppError::Connection(format!(
                    "failed to connect to {addr}: {err}"
                )));
            }
            Err(_elapsed) => {
                return Err(AppError::ConnectionTimedOut(format!(
                    "{addr}: no answer within {:?}",
                    config.connect_timeout()
                )));
            }
        };

        let peer = stream
            .peer_addr()
            .map_err(|err| AppError::Connection(format!("failed to read peer address: {err}")))?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(%peer, %err, "failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Request>(OUTBOUND_CAPACITY);
        let max_frame_bytes = config.max_frame_bytes;
        let cancel = CancellationToken::new();
        let pending = PendingCalls::new();

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(
            async move {
                if let Err(err) = run_writer(
                    peer.to_string(),
                    write_half,
                    outbound_rx,
                    max_frame_bytes,
                    writer_cancel.clone(),
                )
                .await
                {
                    debug!(%err, "client writer ended with error");
                }
                writer_cancel.cancel();
            }
            .instrument(info_span!("rpc_client_writer", %peer)),
        );

        let framed = FramedRead::new(
            read_half,
            FrameCodec::<Response, Request>::new(config.max_frame_bytes),
        );
        let reader = tokio::spawn(
            read_responses(framed, pending.clone(), cancel.clone())
                .instrument(info_span!("rpc_client_reader", %peer)),
        );

        info!(%peer, "connected to gdbrpc server");
        Ok(Self {
            peer,
            call_timeout: config.call_timeout(),
            outbound: Mutex::new(Some(outbound_tx)),
            pending,
            cancel,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    /// Execute `command` remotely and wait for its output, using the
    /// configured call timeout.
    ///
    /// # Errors
    ///
    /// See [`call_with_timeout`](Self::call_with_timeout).
    pub async fn call(&self, command: &str) -> Result<String> {
        self.call_with_timeout(command, self.call_timeout).await
    }

    /// Execute `command` remotely and wait at most `timeout` for its output.
    ///
    /// A timeout abandons the wait only; the command keeps running on the
    /// server and its late response is dropped.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` when `timeout` elapses.
    /// - `AppError::Execution` / `AppError::Interrupted` from the server.
    /// - `AppError::ConnectionClosed` if the connection drops first.
    pub async fn call_with_timeout(&self, command: &str, timeout: Duration) -> Result<String> {
        self.request(
            RequestBody::Exec {
                command: command.to_owned(),
            },
            timeout,
        )
        .await?
        .into_result()
    }

    /// Send `body` and wait for the single response that answers it.
    ///
    /// For a post this is the acknowledgement; use [`post`](Self::post) to
    /// also receive the completion.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` when `timeout` elapses.
    /// - `AppError::ConnectionClosed` if the client is disconnected.
    pub async fn request(&self, body: RequestBody, timeout: Duration) -> Result<Outcome> {
        let id = CallId::new();
        let rx = self.pending.register_call(id);
        self.send(Request { id, body }).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(delivered) => flatten(delivered),
            Err(_elapsed) => {
                self.pending.remove(id);
                Err(AppError::Timeout(format!(
                    "call {id} did not complete within {timeout:?}"
                )))
            }
        }
    }

    /// Enqueue `command` without waiting for it to run.
    ///
    /// Returns once the server has admitted the command. The completion is
    /// delivered through the returned handle.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` if admission is not acknowledged within the
    ///   call timeout.
    /// - `AppError::ConnectionClosed` if the client is disconnected or the
    ///   server's queue is shut down or full.
    pub async fn post(&self, command: &str) -> Result<PostHandle> {
        let request = Request::post(command);
        let id = request.id;
        let (ack, completion) = self.pending.register_post(id);
        let handle = PostHandle::new(id, completion, self.pending.clone());

        self.send(request).await?;

        match tokio::time::timeout(self.call_timeout, ack).await {
            Ok(delivered) => match flatten(delivered)? {
                Outcome::Accepted => Ok(handle),
                other => other.into_result().map(|_| handle),
            },
            Err(_elapsed) => Err(AppError::Timeout(format!(
                "post {id} was not acknowledged within {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Ask the server to interrupt whatever it is executing.
    ///
    /// Returns the server's description of what was interrupted; empty when
    /// nothing was running. The interrupted call itself still receives its
    /// own `Interrupted` outcome.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` / `AppError::ConnectionClosed` as for calls.
    pub async fn interrupt(&self) -> Result<String> {
        self.request(RequestBody::Interrupt, self.call_timeout)
            .await?
            .into_result()
    }

    /// Close the connection. Idempotent.
    ///
    /// Every outstanding call fails with `ConnectionClosed`.
    pub async fn disconnect(&self) {
        let sender = lock(&self.outbound).take();
        if sender.is_none() && self.cancel.is_cancelled() {
            return;
        }
        drop(sender);
        self.cancel.cancel();
        self.pending.fail_all("client disconnected");

        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(%err, "client task failed");
            }
        }
        info!(peer = %self.peer, "disconnected");
    }

    /// Whether the connection is still usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && lock(&self.outbound).is_some()
    }

    /// Number of calls and posts still awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Address of the server.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&self, request: Request) -> Result<()> {
        let id = request.id;
        let sender = lock(&self.outbound).clone();

        // Checked after registration: the reader cancels before failing the
        // table, so an entry added later is caught here.
        let Some(sender) = sender.filter(|_| !self.cancel.is_cancelled()) else {
            self.pending.remove(id);
            return Err(AppError::ConnectionClosed("client is disconnected".into()));
        };

        debug!(call_id = %id, kind = request.body.kind(), "sending request");
        if sender.send(request).await.is_err() {
            self.pending.remove(id);
            return Err(AppError::ConnectionClosed("connection writer has stopped".into()));
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.pending.fail_all("client dropped");
    }
}

/// Reader task: resolves pending calls until the connection ends.
async fn read_responses(
    mut framed: FramedRead<tokio::net::tcp::OwnedReadHalf, FrameCodec<Response, Request>>,
    pending: PendingCalls,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break "client disconnected".to_owned(),
            item = framed.next() => match item {
                None => break "server closed the connection".to_owned(),
                Some(Err(err)) => {
                    warn!(%err, "read failed");
                    break err.to_string();
                }
                Some(Ok(response)) if response.id.is_nil() => {
                    match response.outcome {
                        Outcome::Failure { error } => {
                            warn!(kind = ?error.kind, message = %error.message, "server notice");
                        }
                        other => debug!(outcome = ?other, "ignoring server notice"),
                    }
                }
                Some(Ok(response)) => {
                    pending.resolve(response);
                }
            },
        }
    };

    cancel.cancel();
    pending.fail_all(&reason);
    debug!(reason, "reader stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
