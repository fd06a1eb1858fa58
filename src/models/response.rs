//! Response envelope (server → client).

use serde::{Deserialize, Serialize};

use super::CallId;
use crate::{AppError, Result};

/// Answer to a [`Request`](super::Request), or a connection-level notice when
/// `id` is [`CallId::NIL`].
///
/// A post produces two responses with the same id: [`Outcome::Accepted`] on
/// admission, then the final outcome once the command has run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Response {
    /// Correlation id copied from the originating request.
    pub id: CallId,
    /// Result of the call.
    pub outcome: Outcome,
}

/// Result carried by a [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case", deny_unknown_fields)]
pub enum Outcome {
    /// The command ran to completion.
    Success {
        /// Captured textual output.
        output: String,
    },
    /// A post was admitted to the execution queue.
    Accepted,
    /// The command (or the exchange) failed.
    Failure {
        /// What went wrong.
        error: RemoteError,
    },
}

/// Failure descriptor sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RemoteError {
    /// Failure category.
    pub kind: RemoteErrorKind,
    /// Diagnostic text from the debugger, shell, or server.
    pub message: String,
}

/// Failure categories a server can report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The command ran and failed.
    Execution,
    /// The command was preempted by an interrupt.
    Interrupted,
    /// The server rejected the bytes it received.
    Protocol,
    /// The execution queue is shut down.
    Unavailable,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(id: CallId, output: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Success {
                output: output.into(),
            },
        }
    }

    /// Post admission acknowledgement.
    #[must_use]
    pub fn accepted(id: CallId) -> Self {
        Self {
            id,
            outcome: Outcome::Accepted,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn failure(id: CallId, kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Failure {
                error: RemoteError {
                    kind,
                    message: message.into(),
                },
            },
        }
    }
}

impl Outcome {
    /// Build the outcome reported for a dispatch result.
    ///
    /// Interruption keeps its own kind; every other error is an execution
    /// failure because the round trip itself succeeded.
    #[must_use]
    pub fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(output) => Self::Success { output },
            Err(AppError::Interrupted(message)) => Self::Failure {
                error: RemoteError {
                    kind: RemoteErrorKind::Interrupted,
                    message,
                },
            },
            Err(AppError::Execution(message)) => Self::Failure {
                error: RemoteError {
                    kind: RemoteErrorKind::Execution,
                    message,
                },
            },
            Err(err) => Self::Failure {
                error: RemoteError {
                    kind: RemoteErrorKind::Execution,
                    message: err.to_string(),
                },
            },
        }
    }

    /// Convert into the caller-facing result.
    ///
    /// [`Outcome::Accepted`] yields an empty output.
    ///
    /// # Errors
    ///
    /// Maps each [`RemoteErrorKind`] to the matching [`AppError`] variant.
    pub fn into_result(self) -> Result<String> {
        match self {
            Self::Success { output } => Ok(output),
            Self::Accepted => Ok(String::new()),
            Self::Failure { error } => Err(error.into()),
        }
    }

    /// Whether this is a post admission acknowledgement.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl From<RemoteError> for AppError {
    fn from(error: RemoteError) -> Self {
        match error.kind {
            RemoteErrorKind::Execution => Self::Execution(error.message),
            RemoteErrorKind::Interrupted => Self::Interrupted(error.message),
            RemoteErrorKind::Protocol => Self::Protocol(error.message),
            RemoteErrorKind::Unavailable => Self::ConnectionClosed(error.message),
        }
    }
}
