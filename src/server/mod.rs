//! RPC listener.
//!
//! A [`Server`] owns its listening socket, the execution worker (and through
//! it the debugger), and one task per client connection. There is no global
//! instance: whoever constructs a server starts and stops it.
//!
//! Submodules:
//! - `connection`: per-client read loop and admission to the queue.
//! - `queue`: the single-consumer execution queue and interrupt channel.
//! - `dispatch`: routing of command payloads to debugger, shell or handler.
//! - `shell`: host program execution.

mod connection;
pub mod dispatch;
pub mod queue;
pub mod shell;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::ServerConfig;
use crate::server::connection::{handle_connection, ConnectionContext};
use crate::server::dispatch::Dispatcher;
use crate::server::queue::{spawn_worker, QueueHandle};
use crate::{AppError, Result};

/// Snapshot reported by [`Server::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    /// Whether the listener is accepting connections.
    pub running: bool,
    /// Bound address while running.
    pub addr: Option<SocketAddr>,
    /// Number of connected clients.
    pub clients: usize,
    /// Jobs waiting in the execution queue.
    pub queued: usize,
}

/// Live connections, keyed by a server-assigned id.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClientRegistry {
    next_id: Arc<AtomicU64>,
    clients: Arc<Mutex<HashMap<u64, SocketAddr>>>,
}

impl ClientRegistry {
    pub(crate) fn insert(&self, peer: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, peer);
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SocketAddr>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State that only exists while the server is started.
#[derive(Debug)]
struct Running {
    addr: SocketAddr,
    cancel: CancellationToken,
    queue: QueueHandle,
    accept_task: JoinHandle<()>,
    worker_task: JoinHandle<Dispatcher>,
}

/// The RPC listener process.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    dispatcher: Option<Dispatcher>,
    clients: ClientRegistry,
    running: Option<Running>,
}

impl Server {
    /// Create a stopped server around `dispatcher`.
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher: Some(dispatcher),
            clients: ClientRegistry::default(),
            running: None,
        }
    }

    /// Bind `host:port` and start accepting connections.
    ///
    /// When the port cannot be bound and `bind_fallback` is enabled, an
    /// ephemeral port on the same host is used instead. Returns the address
    /// actually bound.
    ///
    /// # Errors
    ///
    /// - `AppError::Connection` if the server is already running, the
    ///   dispatcher was lost, or binding fails.
    pub async fn start(&mut self, host: &str, port: u16) -> Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Err(AppError::Connection(format!(
                "server already running on {}",
                running.addr
            )));
        }

        let listener = self.bind(host, port).await?;
        let addr = listener
            .local_addr()
            .map_err(|err| AppError::Connection(format!("failed to read bound address: {err}")))?;

        let Some(dispatcher) = self.dispatcher.take() else {
            return Err(AppError::Connection(
                "dispatcher unavailable; the previous worker did not shut down cleanly".into(),
            ));
        };

        let cancel = CancellationToken::new();
        let (queue, worker_task) =
            spawn_worker(dispatcher, self.config.queue_capacity, cancel.child_token());

        let ctx = ConnectionContext {
            queue: queue.clone(),
            clients: self.clients.clone(),
            max_frame_bytes: self.config.max_frame_bytes,
            cancel: cancel.clone(),
        };
        let accept_task = tokio::spawn(accept_loop(listener, ctx));

        info!(%addr, "gdbrpc server started");
        self.running = Some(Running {
            addr,
            cancel,
            queue,
            accept_task,
            worker_task,
        });
        Ok(addr)
    }

    /// Stop accepting, close every connection, and stop the worker.
    ///
    /// Idempotent. A command still executing is asked to stop its target and
    /// then abandoned. The dispatcher is recovered so the server can be
    /// started again.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();

        if let Err(err) = running.accept_task.await {
            warn!(%err, "accept task failed");
        }

        match running.worker_task.await {
            Ok(dispatcher) => self.dispatcher = Some(dispatcher),
            Err(err) => warn!(%err, "execution worker failed; dispatcher lost"),
        }

        info!(addr = %running.addr, "gdbrpc server stopped");
    }

    /// Whether the listener is accepting connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.accept_task.is_finished())
    }

    /// Bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    /// Current listener status.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            running: self.is_running(),
            addr: self.local_addr(),
            clients: self.clients.len(),
            queued: self.running.as_ref().map_or(0, |running| running.queue.queued()),
        }
    }

    async fn bind(&self, host: &str, port: u16) -> Result<TcpListener> {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => Ok(listener),
            Err(err) if self.config.bind_fallback && port != 0 => {
                info!(host, port, %err, "port unavailable, binding an ephemeral port");
                TcpListener::bind((host, 0)).await.map_err(|err| {
                    AppError::Connection(format!("failed to bind {host}:0: {err}"))
                })
            }
            Err(err) => Err(AppError::Connection(format!(
                "failed to bind {host}:{port}: {err}"
            ))),
        }
    }
}

/// Accept connections until cancelled, spawning one task per client.
async fn accept_loop(listener: TcpListener, ctx: ConnectionContext) {
    let span = info_span!("rpc_server");
    async move {
        let mut connections = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                () = ctx.cancel.cancelled() => {
                    info!("accept loop shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            if let Err(err) = stream.set_nodelay(true) {
                                warn!(%peer, %err, "failed to set TCP_NODELAY");
                            }
                            connections.spawn(handle_connection(stream, peer, ctx.clone()));
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}
    }
    .instrument(span)
    .await;
}
