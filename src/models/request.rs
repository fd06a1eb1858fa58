//! Request envelope (client → server).

use serde::{Deserialize, Serialize};

use super::CallId;

/// A single call issued by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Request {
    /// Correlation id chosen by the caller.
    pub id: CallId,
    /// What the caller wants done.
    pub body: RequestBody,
}

/// Closed set of request kinds understood by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum RequestBody {
    /// Run a command and answer with its result.
    Exec {
        /// Console command; see [`Route`](crate::server::dispatch::Route).
        command: String,
    },
    /// Run a command; acknowledge at once and report the result later.
    Post {
        /// Console command; see [`Route`](crate::server::dispatch::Route).
        command: String,
    },
    /// Stop whatever command currently occupies the execution worker.
    Interrupt,
}

impl Request {
    /// Build an [`RequestBody::Exec`] request with a fresh id.
    #[must_use]
    pub fn exec(command: impl Into<String>) -> Self {
        Self {
            id: CallId::new(),
            body: RequestBody::Exec {
                command: command.into(),
            },
        }
    }

    /// Build a [`RequestBody::Post`] request with a fresh id.
    #[must_use]
    pub fn post(command: impl Into<String>) -> Self {
        Self {
            id: CallId::new(),
            body: RequestBody::Post {
                command: command.into(),
            },
        }
    }

    /// Build an [`RequestBody::Interrupt`] request with a fresh id.
    #[must_use]
    pub fn interrupt() -> Self {
        Self {
            id: CallId::new(),
            body: RequestBody::Interrupt,
        }
    }
}

impl RequestBody {
    /// Short name of the variant, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exec { .. } => "exec",
            Self::Post { .. } => "post",
            Self::Interrupt => "interrupt",
        }
    }

    /// The command text, if this kind carries one.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Exec { command } | Self::Post { command } => Some(command),
            Self::Interrupt => None,
        }
    }
}
