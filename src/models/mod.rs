//! Wire schema exchanged between client and server.
//!
//! These are the only shapes the codec will decode: anything that does not
//! deserialize into a [`Request`] (server side) or [`Response`] (client side)
//! is a protocol error.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod request;
pub mod response;

pub use request::{Request, RequestBody};
pub use response::{Outcome, RemoteError, RemoteErrorKind, Response};

/// Correlation token pairing a [`Request`] with its eventual [`Response`].
///
/// Generated by the caller; unique for as long as the call is outstanding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// Reserved id for connection-level notices that answer no specific call.
    pub const NIL: Self = Self(Uuid::nil());

    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether this is the reserved [`CallId::NIL`] id.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
