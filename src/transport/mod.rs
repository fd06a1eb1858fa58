//! Byte-stream plumbing shared by the server and the client.
//!
//! - `codec`: length-prefixed framing and the pluggable payload serializer.
//! - `writer`: per-connection outbound task fed by an `mpsc` channel.

pub mod codec;
pub mod writer;
