//! Unit tests for the length-prefixed frame codec.
//!
//! Covers:
//! - a complete frame decodes into the expected envelope
//! - a partial header or payload yields `Ok(None)` until the rest arrives
//! - two frames in one buffer decode one at a time
//! - an oversize length header is a protocol error
//! - a payload of the wrong shape is a protocol error
//! - encoding writes a 4-byte big-endian header
//! - encoding refuses payloads above the limit

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use gdbrpc::models::{CallId, Request, RequestBody, Response};
use gdbrpc::transport::codec::{FrameCodec, HEADER_LEN};
use gdbrpc::AppError;

type ServerCodec = FrameCodec<Request, Response>;
type ClientCodec = FrameCodec<Response, Request>;

fn frame(payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(u32::try_from(payload.len()).unwrap());
    buf.put_slice(payload);
    buf
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// A complete frame holding a JSON request decodes into that request.
#[test]
fn complete_frame_decodes_request() {
    let request = Request::exec("info threads");
    let payload = serde_json::to_vec(&request).unwrap();
    let mut buf = frame(&payload);

    let decoded = ServerCodec::new(1024)
        .decode(&mut buf)
        .expect("decode must succeed")
        .expect("a full frame must yield a message");

    assert_eq!(decoded, request);
    assert!(buf.is_empty(), "the frame must be consumed entirely");
}

/// Bytes arriving in pieces are buffered until the frame is complete.
#[test]
fn partial_frame_needs_more_data() {
    let request = Request::exec("bt");
    let payload = serde_json::to_vec(&request).unwrap();
    let whole = frame(&payload);
    let mut codec = ServerCodec::new(1024);

    let mut buf = BytesMut::from(&whole[..2]);
    assert!(
        codec.decode(&mut buf).unwrap().is_none(),
        "half a header is not a frame"
    );

    buf.extend_from_slice(&whole[2..HEADER_LEN + 3]);
    assert!(
        codec.decode(&mut buf).unwrap().is_none(),
        "a truncated payload is not a frame"
    );

    buf.extend_from_slice(&whole[HEADER_LEN + 3..]);
    let decoded = codec.decode(&mut buf).unwrap();
    assert_eq!(decoded, Some(request));
}

/// Two frames delivered together decode as two messages.
#[test]
fn back_to_back_frames_decode_separately() {
    let first = Request::exec("frame");
    let second = Request::interrupt();
    let mut buf = frame(&serde_json::to_vec(&first).unwrap());
    buf.extend_from_slice(&frame(&serde_json::to_vec(&second).unwrap()));
    let mut codec = ServerCodec::new(1024);

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

/// A header announcing more than the limit fails without waiting for the
/// payload.
#[test]
fn oversize_header_is_protocol_error() {
    let mut buf = BytesMut::new();
    buf.put_u32(4096);
    let mut codec = ServerCodec::new(64);

    let err = codec.decode(&mut buf).expect_err("oversize frame must fail");
    assert!(
        matches!(err, AppError::Protocol(ref msg) if msg.contains("frame too large")),
        "expected protocol error, got {err:?}"
    );
}

/// Bytes that are not JSON are rejected.
#[test]
fn garbage_payload_is_protocol_error() {
    let mut buf = frame(b"\x00\x01not json");
    let err = ServerCodec::new(1024)
        .decode(&mut buf)
        .expect_err("garbage must fail");
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("malformed frame")));
}

/// Valid JSON of a shape outside the allowed envelope is rejected.
#[test]
fn foreign_shape_is_protocol_error() {
    let mut buf = frame(br#"{"id":"00000000-0000-0000-0000-000000000000","body":{"kind":"eval","code":"1+1"}}"#);
    let err = ServerCodec::new(1024)
        .decode(&mut buf)
        .expect_err("unknown kind must fail");
    assert!(matches!(err, AppError::Protocol(_)));

    let mut buf = frame(br#"{"id":"00000000-0000-0000-0000-000000000000","body":{"kind":"interrupt"},"extra":1}"#);
    let err = ServerCodec::new(1024)
        .decode(&mut buf)
        .expect_err("unknown field must fail");
    assert!(matches!(err, AppError::Protocol(_)));
}

/// A server only decodes requests: a response frame is not accepted.
#[test]
fn response_frame_rejected_by_server_codec() {
    let response = Response::success(CallId::new(), "ok");
    let mut buf = frame(&serde_json::to_vec(&response).unwrap());
    assert!(ServerCodec::new(1024).decode(&mut buf).is_err());
}

// ── Encoding ────────────────────────────────────────────────────────────────

/// Encoding prefixes the JSON payload with its big-endian length.
#[test]
fn encode_writes_big_endian_header() {
    let request = Request {
        id: CallId::NIL,
        body: RequestBody::Interrupt,
    };
    let mut buf = BytesMut::new();
    ClientCodec::new(1024)
        .encode(request.clone(), &mut buf)
        .expect("encode must succeed");

    let expected = serde_json::to_vec(&request).unwrap();
    let len = u32::from_be_bytes(buf[..HEADER_LEN].try_into().unwrap());
    assert_eq!(len as usize, expected.len());
    assert_eq!(&buf[HEADER_LEN..], expected.as_slice());
}

/// Payloads above the limit are refused at the sender.
#[test]
fn encode_refuses_oversize_payload() {
    let request = Request::exec("x".repeat(256));
    let mut buf = BytesMut::new();
    let err = ClientCodec::new(64)
        .encode(request, &mut buf)
        .expect_err("oversize encode must fail");
    assert!(matches!(err, AppError::Protocol(_)));
}

/// What one side encodes the other decodes.
#[test]
fn client_encoding_decodes_on_server() {
    let request = Request::post("continue");
    let mut buf = BytesMut::new();
    ClientCodec::new(1024).encode(request.clone(), &mut buf).unwrap();

    let decoded = ServerCodec::new(1024).decode(&mut buf).unwrap();
    assert_eq!(decoded, Some(request));
}
