//! Outbound write path.
//!
//! Receives messages from a tokio [`mpsc`] channel and writes each one as a
//! length-prefixed frame through [`FramedWrite`]. One writer task runs per
//! connection so a slow peer only ever stalls its own socket.

use std::time::Duration;

use futures_util::SinkExt;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::codec::FrameCodec;
use crate::Result;

/// How long a cancelled writer keeps trying to flush queued messages.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Writer task: drains `msg_rx` into `sink` as frames.
///
/// Exits when:
/// - `msg_rx` is closed (all senders dropped), or
/// - `cancel` fires; messages already queued at that point are still
///   written so a final notice reaches the peer before the socket closes,
///   provided the peer drains them within [`CLOSE_GRACE`].
///
/// A write blocked on a peer that stopped reading is abandoned on `cancel`.
///
/// # Errors
///
/// Returns the first encode or write failure; the connection is unusable
/// after that.
pub async fn run_writer<W, Out>(
    peer: String,
    sink: W,
    mut msg_rx: mpsc::Receiver<Out>,
    max_frame_bytes: usize,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    Out: Serialize,
{
    let mut framed = FramedWrite::new(sink, FrameCodec::<(), Out>::new(max_frame_bytes));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(peer, "writer: cancellation received, flushing queued messages");
                let flush = async {
                    while let Ok(msg) = msg_rx.try_recv() {
                        framed.feed(msg).await?;
                    }
                    framed.close().await
                };
                return match tokio::time::timeout(CLOSE_GRACE, flush).await {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        warn!(peer, "writer: peer did not drain before close, dropping queued messages");
                        Ok(())
                    }
                };
            }

            msg = msg_rx.recv() => {
                match msg {
                    None => {
                        debug!(peer, "writer: message channel closed, stopping");
                        break;
                    }
                    Some(msg) => {
                        tokio::select! {
                            result = framed.send(msg) => {
                                if let Err(err) = result {
                                    warn!(peer, error = %err, "writer: write failed");
                                    return Err(err);
                                }
                            }
                            () = cancel.cancelled() => {
                                warn!(peer, "writer: cancelled while the peer was not reading");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    framed.close().await
}
