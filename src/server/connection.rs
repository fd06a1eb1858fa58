//! Per-connection read loop.
//!
//! Each accepted socket is split in two. The read half stays here: frames
//! are decoded into [`Request`]s and either enqueued on the execution queue
//! or, for interrupts, handled on the spot. The write half belongs to a
//! [`run_writer`] task fed by an `mpsc` channel that the execution worker
//! also holds a clone of, so results reach the connection that asked.
//!
//! The loop never stops reading while it waits for room in the execution
//! queue. Jobs wait in a per-connection backlog and an interrupt frame is
//! answered as soon as it is decoded. A backlog at [`BACKLOG_LIMIT`] turns
//! further requests away with `unavailable`.
//!
//! A protocol error closes this connection only. Before closing, a notice
//! with [`CallId::NIL`] is sent so the client can log why.

use std::collections::VecDeque;
use std::net::SocketAddr;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::{CallId, RemoteErrorKind, Request, RequestBody, Response};
use crate::server::queue::{deliver, Job, JobMode, QueueHandle};
use crate::server::ClientRegistry;
use crate::transport::codec::FrameCodec;
use crate::transport::writer::run_writer;
use crate::AppError;

/// Responses buffered per connection; beyond this the peer is not reading.
const OUTBOUND_CAPACITY: usize = 64;

/// Requests a connection may hold while the execution queue is full.
const BACKLOG_LIMIT: usize = 64;

/// Everything a connection task needs from its server.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) queue: QueueHandle,
    pub(crate) clients: ClientRegistry,
    pub(crate) max_frame_bytes: usize,
    pub(crate) cancel: CancellationToken,
}

/// Why a read loop ended.
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    Shutdown,
    Protocol(String),
    Io(String),
}

/// Serve one client until it disconnects, misbehaves, or the server stops.
pub(crate) async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: ConnectionContext) {
    let span = info_span!("rpc_conn", %peer);
    async move {
        let connection_id = ctx.clients.insert(peer);
        info!(clients = ctx.clients.len(), "client connected");

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Response>(OUTBOUND_CAPACITY);
        let writer_cancel = ctx.cancel.child_token();
        let writer = tokio::spawn(run_writer(
            peer.to_string(),
            write_half,
            outbound_rx,
            ctx.max_frame_bytes,
            writer_cancel.clone(),
        ));

        let mut framed = FramedRead::new(
            read_half,
            FrameCodec::<Request, Response>::new(ctx.max_frame_bytes),
        );

        let peer_name = peer.to_string();
        let mut backlog: VecDeque<Job> = VecDeque::new();

        let reason = loop {
            tokio::select! {
                biased;

                () = ctx.cancel.cancelled() => break CloseReason::Shutdown,

                permit = ctx.queue.reserve(), if !backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(job) = backlog.pop_front() {
                            permit.send(job);
                        }
                    }
                    Err(err) => {
                        for job in backlog.drain(..) {
                            reject(&job, &err.to_string());
                        }
                        break CloseReason::Shutdown;
                    }
                },

                item = framed.next() => match item {
                    None => break CloseReason::PeerClosed,
                    Some(Err(AppError::Protocol(msg))) => break CloseReason::Protocol(msg),
                    Some(Err(err)) => break CloseReason::Io(err.to_string()),
                    Some(Ok(request)) => {
                        accept(request, &peer_name, &ctx.queue, &outbound_tx, &mut backlog);
                    }
                },
            }
        };

        match &reason {
            CloseReason::PeerClosed => debug!("peer closed the connection"),
            CloseReason::Shutdown => debug!("closing connection for shutdown"),
            CloseReason::Protocol(msg) => {
                warn!(error = %msg, "protocol error, closing connection");
                let notice = Response::failure(CallId::NIL, RemoteErrorKind::Protocol, msg.clone());
                deliver(&outbound_tx, notice, &peer_name);
            }
            CloseReason::Io(msg) => warn!(error = %msg, "read failed, closing connection"),
        }

        // Requests read before the close still run, unless the server is stopping.
        while let Some(job) = backlog.pop_front() {
            tokio::select! {
                biased;

                () = ctx.cancel.cancelled() => {
                    debug!(count = backlog.len() + 1, "dropping requests never admitted");
                    break;
                }
                permit = ctx.queue.reserve() => match permit {
                    Ok(permit) => permit.send(job),
                    Err(err) => reject(&job, &err.to_string()),
                },
            }
        }

        drop(outbound_tx);
        writer_cancel.cancel();
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(%err, "writer ended with error"),
            Err(err) => warn!(%err, "writer task failed"),
        }

        ctx.clients.remove(connection_id);
        info!(clients = ctx.clients.len(), "client disconnected");
    }
    .instrument(span)
    .await;
}

/// Handle one decoded request without waiting.
///
/// Interrupts are answered here; everything else joins the backlog.
fn accept(
    request: Request,
    peer: &str,
    queue: &QueueHandle,
    outbound: &mpsc::Sender<Response>,
    backlog: &mut VecDeque<Job>,
) {
    let Request { id, body } = request;
    info!(call_id = %id, kind = body.kind(), "request received");

    let (command, mode) = match body {
        RequestBody::Interrupt => {
            let output = match queue.interrupt() {
                Some(target) => format!("interrupt delivered to call {target}"),
                None => String::new(),
            };
            deliver(outbound, Response::success(id, output), peer);
            return;
        }
        RequestBody::Exec { command } => (command, JobMode::Call),
        RequestBody::Post { command } => (command, JobMode::Post),
    };

    let job = Job {
        call_id: id,
        command,
        mode,
        reply: outbound.clone(),
        peer: peer.to_owned(),
    };

    if backlog.len() >= BACKLOG_LIMIT {
        reject(&job, "execution queue is full");
        return;
    }

    if mode == JobMode::Post && !deliver(outbound, Response::accepted(id), peer) {
        return;
    }
    backlog.push_back(job);
}

/// Answer a job that will never run.
fn reject(job: &Job, reason: &str) {
    warn!(call_id = %job.call_id, reason, "request rejected");
    deliver(
        &job.reply,
        Response::failure(job.call_id, RemoteErrorKind::Unavailable, reason),
        &job.peer,
    );
}
