//! Pending-call table.
//!
//! Shared between callers (which register an entry, then await its oneshot)
//! and the client reader task (which resolves entries as responses arrive).
//! An entry lives until its final response, a caller timeout, or
//! disconnection, whichever comes first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::models::{CallId, Outcome, Response};
use crate::{AppError, Result};

/// Delivery slot for one outstanding response.
type Slot = oneshot::Sender<Result<Outcome>>;

/// What a table entry is waiting for.
#[derive(Debug)]
enum Waiter {
    /// A blocking call: one response ends it.
    Call(Slot),
    /// A post: an acknowledgement, then the completion.
    Post {
        ack: Option<Slot>,
        completion: Slot,
    },
}

#[derive(Debug)]
struct PendingCall {
    waiter: Waiter,
    created_at: DateTime<Utc>,
}

/// Thread-safe map of outstanding calls keyed by [`CallId`].
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    inner: Arc<Mutex<HashMap<CallId, PendingCall>>>,
}

impl PendingCalls {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blocking call and return the receiver for its response.
    #[must_use]
    pub fn register_call(&self, id: CallId) -> oneshot::Receiver<Result<Outcome>> {
        let (tx, rx) = oneshot::channel();
        self.insert(id, Waiter::Call(tx));
        rx
    }

    /// Register a post; returns `(ack, completion)` receivers.
    #[must_use]
    pub fn register_post(
        &self,
        id: CallId,
    ) -> (
        oneshot::Receiver<Result<Outcome>>,
        oneshot::Receiver<Result<Outcome>>,
    ) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.insert(
            id,
            Waiter::Post {
                ack: Some(ack_tx),
                completion: done_tx,
            },
        );
        (ack_rx, done_rx)
    }

    /// Route `response` to its waiter.
    ///
    /// Returns `false` when no entry matches; the response is then dropped.
    pub fn resolve(&self, response: Response) -> bool {
        let Response { id, outcome } = response;
        let mut map = self.lock();

        let Some(entry) = map.get_mut(&id) else {
            drop(map);
            warn!(call_id = %id, "response for unknown call, dropping");
            return false;
        };

        if outcome.is_accepted() {
            return match &mut entry.waiter {
                Waiter::Post { ack, .. } => {
                    if let Some(ack) = ack.take() {
                        let _ = ack.send(Ok(outcome));
                    }
                    true
                }
                Waiter::Call(_) => {
                    warn!(call_id = %id, "acknowledgement for a blocking call, ignoring");
                    true
                }
            };
        }

        let Some(entry) = map.remove(&id) else {
            return false;
        };
        drop(map);

        let age_ms = (Utc::now() - entry.created_at).num_milliseconds();
        debug!(call_id = %id, age_ms, "call resolved");

        match entry.waiter {
            Waiter::Call(tx) => {
                let _ = tx.send(Ok(outcome));
            }
            Waiter::Post { ack, completion } => {
                // A failure before admission answers both halves.
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(outcome.clone()));
                }
                let _ = completion.send(Ok(outcome));
            }
        }
        true
    }

    /// Forget `id`; returns whether an entry was removed.
    pub fn remove(&self, id: CallId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Fail every outstanding entry with `ConnectionClosed(reason)`.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<(CallId, PendingCall)> = self.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), reason, "failing pending calls");
        }

        let closed = || Err(AppError::ConnectionClosed(reason.to_owned()));
        for (_, entry) in drained {
            match entry.waiter {
                Waiter::Call(tx) => {
                    let _ = tx.send(closed());
                }
                Waiter::Post { ack, completion } => {
                    if let Some(ack) = ack {
                        let _ = ack.send(closed());
                    }
                    let _ = completion.send(closed());
                }
            }
        }
    }

    /// Number of outstanding entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn insert(&self, id: CallId, waiter: Waiter) {
        let previous = self.lock().insert(
            id,
            PendingCall {
                waiter,
                created_at: Utc::now(),
            },
        );
        if previous.is_some() {
            warn!(call_id = %id, "call id reused while outstanding, replacing entry");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CallId, PendingCall>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to an admitted post.
///
/// The command runs on the server regardless of what happens to this
/// handle. Dropping it (or timing out in [`wait`](Self::wait)) only stops
/// the completion from being delivered here.
#[derive(Debug)]
pub struct PostHandle {
    id: CallId,
    completion: Option<oneshot::Receiver<Result<Outcome>>>,
    pending: PendingCalls,
}

impl PostHandle {
    pub(crate) fn new(
        id: CallId,
        completion: oneshot::Receiver<Result<Outcome>>,
        pending: PendingCalls,
    ) -> Self {
        Self {
            id,
            completion: Some(completion),
            pending,
        }
    }

    /// Id shared by the post and its completion.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Wait for the completion.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` if `timeout` elapses; the entry is released.
    /// - `AppError::ConnectionClosed` if the client disconnected first.
    /// - The remote failure, mapped through [`Outcome::into_result`].
    pub async fn wait(mut self, timeout: Duration) -> Result<String> {
        let Some(completion) = self.completion.take() else {
            return Err(AppError::ConnectionClosed("completion already taken".into()));
        };

        match tokio::time::timeout(timeout, completion).await {
            Ok(delivered) => flatten(delivered)?.into_result(),
            Err(_elapsed) => {
                self.pending.remove(self.id);
                Err(AppError::Timeout(format!(
                    "post {} did not complete within {timeout:?}",
                    self.id
                )))
            }
        }
    }

    /// Run `callback` with the completion on a background task.
    ///
    /// The callback receives `ConnectionClosed` if the client disconnects
    /// before the post completes.
    pub fn on_complete<F, Fut>(mut self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Result<String>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // With the receiver taken, Drop leaves the entry for the reader task.
        let completion = self.completion.take();
        let id = self.id;

        tokio::spawn(async move {
            let result = match completion {
                Some(rx) => flatten(rx.await).and_then(Outcome::into_result),
                None => Err(AppError::ConnectionClosed("completion already taken".into())),
            };
            debug!(call_id = %id, ok = result.is_ok(), "post completion delivered");
            callback(result).await;
        })
    }
}

impl Drop for PostHandle {
    fn drop(&mut self) {
        if self.completion.is_some() {
            self.pending.remove(self.id);
        }
    }
}

/// Collapse a oneshot delivery into the outcome it carries.
pub(crate) fn flatten(
    delivered: std::result::Result<Result<Outcome>, oneshot::error::RecvError>,
) -> Result<Outcome> {
    delivered.unwrap_or_else(|_| {
        Err(AppError::ConnectionClosed(
            "call abandoned before a response arrived".into(),
        ))
    })
}
