//! Length-prefixed frame codec.
//!
//! Every message on the wire is a 4-byte big-endian length header followed by
//! exactly that many bytes of serialized payload. Framing is delegated to
//! [`LengthDelimitedCodec`]; the payload is handed to a [`WireFormat`].
//!
//! The codec is typed on both directions: a server decodes only
//! [`Request`](crate::models::Request) and encodes only
//! [`Response`](crate::models::Response), a client the reverse. A frame whose
//! payload does not deserialize into the expected envelope is rejected, which
//! is what keeps untrusted bytes from constructing anything else.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use gdbrpc::models::{Request, Response};
//! use gdbrpc::transport::codec::FrameCodec;
//!
//! let reader = FramedRead::new(read_half, FrameCodec::<Request, Response>::new(max));
//! ```

use std::io;
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::length_delimited::LengthDelimitedCodecError;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{AppError, Result};

/// Width of the length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Serializer used for frame payloads.
pub trait WireFormat {
    /// Serialize `value` into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if `value` cannot be represented.
    fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>>;

    /// Deserialize payload bytes into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the bytes are corrupt or describe
    /// a shape other than `T`.
    fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl WireFormat for Json {
    fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|err| AppError::Protocol(format!("failed to serialize message: {err}")))
    }

    fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|err| AppError::Protocol(format!("malformed frame: {err}")))
    }
}

/// Typed frame codec: decodes `In`, encodes `Out`.
///
/// # Decoder
///
/// - `Ok(None)`: the buffer holds only part of a frame; read more bytes.
/// - `Ok(Some(msg))`: one complete frame was consumed.
/// - `Err(AppError::Protocol)`: the header announces more than the frame
///   limit, or the payload is not a valid `In`. The stream cannot be
///   resynchronized after this and the connection must be closed.
///
/// # Encoder
///
/// Payloads larger than the frame limit are refused with
/// [`AppError::Protocol`] rather than sent to a peer that would reject them.
pub struct FrameCodec<In, Out, F = Json> {
    frames: LengthDelimitedCodec,
    max_frame_bytes: usize,
    _marker: PhantomData<fn(Out) -> (In, F)>,
}

impl<In, Out, F> FrameCodec<In, Out, F> {
    /// Create a codec that rejects frames longer than `max_frame_bytes`.
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .length_field_length(HEADER_LEN)
            .big_endian()
            .max_frame_length(max_frame_bytes)
            .new_codec();

        Self {
            frames,
            max_frame_bytes,
            _marker: PhantomData,
        }
    }
}

impl<In, Out, F> std::fmt::Debug for FrameCodec<In, Out, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish_non_exhaustive()
    }
}

impl<In, Out, F> Decoder for FrameCodec<In, Out, F>
where
    In: DeserializeOwned,
    F: WireFormat,
{
    type Item = In;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(frame) = self
            .frames
            .decode(src)
            .map_err(|err| map_frame_error(err, self.max_frame_bytes))?
        else {
            return Ok(None);
        };

        F::from_bytes(&frame).map(Some)
    }
}

impl<In, Out, F> Encoder<Out> for FrameCodec<In, Out, F>
where
    Out: Serialize,
    F: WireFormat,
{
    type Error = AppError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<()> {
        let payload = F::to_bytes(&item)?;
        self.frames
            .encode(Bytes::from(payload), dst)
            .map_err(|err| map_frame_error(err, self.max_frame_bytes))
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a framing-layer [`io::Error`] to an [`AppError`].
///
/// Length violations surface as `io::Error` wrapping
/// [`LengthDelimitedCodecError`]; those are protocol errors, not I/O.
fn map_frame_error(err: io::Error, max_frame_bytes: usize) -> AppError {
    let is_length_violation = err
        .get_ref()
        .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>());

    if is_length_violation {
        AppError::Protocol(format!("frame too large: exceeded {max_frame_bytes} bytes"))
    } else {
        AppError::from(err)
    }
}
