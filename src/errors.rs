//! Error types shared across the server, client and debugger backend.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all failure modes of the bridge.
///
/// Connection-level failures are split into distinct variants so callers can
/// tell a refused connect from a reset socket or a slow handshake without
/// parsing messages.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Local I/O failure not attributable to the remote peer.
    Io(String),
    /// The peer actively refused the TCP connection.
    ConnectionRefused(String),
    /// The TCP connect did not complete within the configured window.
    ConnectionTimedOut(String),
    /// The connection was closed, reset, or torn down by `disconnect`.
    ConnectionClosed(String),
    /// Any other socket failure (bind, accept, address resolution).
    Connection(String),
    /// Malformed frame, oversize frame, or a message outside the allow-list.
    Protocol(String),
    /// A caller-side deadline elapsed. Never cancels remote work.
    Timeout(String),
    /// The dispatched command itself failed.
    Execution(String),
    /// The command was preempted by the interrupt signal.
    Interrupted(String),
    /// Debugger backend failure (process spawn, exit, or pipe errors).
    Debugger(String),
}

impl AppError {
    /// Whether this error means the connection is no longer usable.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused(_)
                | Self::ConnectionTimedOut(_)
                | Self::ConnectionClosed(_)
                | Self::Connection(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::ConnectionRefused(msg) => write!(f, "connection refused: {msg}"),
            Self::ConnectionTimedOut(msg) => write!(f, "connection timed out: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Execution(msg) => write!(f, "execution: {msg}"),
            Self::Interrupted(msg) => write!(f, "interrupted: {msg}"),
            Self::Debugger(msg) => write!(f, "debugger: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused(err.to_string()),
            ErrorKind::TimedOut => Self::ConnectionTimedOut(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::ConnectionClosed(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}
