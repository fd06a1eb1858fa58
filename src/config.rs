//! Configuration parsing and validation for the server and the client.
//!
//! Every key has a default, so an empty file (or no file at all) yields a
//! usable configuration. Command-line flags override values loaded here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Default TCP port shared by the server and the client.
pub const DEFAULT_PORT: u16 = 20819;

/// Default largest frame accepted by either side: 16 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_gdb_program() -> String {
    "gdb".into()
}

fn default_startup_timeout_seconds() -> u64 {
    10
}

fn default_call_timeout_seconds() -> u64 {
    300
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

/// Host shell execution settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShellConfig {
    /// Whether `!cmd` / `shell cmd` requests may run host commands.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Settings for the GDB child process driven over the MI interpreter.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GdbConfig {
    /// Debugger executable.
    #[serde(default = "default_gdb_program")]
    pub program: String,
    /// Extra arguments appended after the interpreter flags.
    #[serde(default)]
    pub args: Vec<String>,
    /// How long to wait for the first `(gdb)` prompt.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            program: default_gdb_program(),
            args: Vec::new(),
            startup_timeout_seconds: default_startup_timeout_seconds(),
        }
    }
}

impl GdbConfig {
    /// Startup timeout as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }
}

/// Listener-side configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind an ephemeral port when the configured one is unavailable.
    #[serde(default = "default_true")]
    pub bind_fallback: bool,
    /// Largest frame the server decodes or encodes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Bound of the execution queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Directory for per-run log files; terminal-only logging when absent.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Host shell execution settings.
    #[serde(default)]
    pub shell: ShellConfig,
    /// Debugger process settings.
    #[serde(default)]
    pub gdb: GdbConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            bind_fallback: true,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            queue_capacity: default_queue_capacity(),
            log_dir: None,
            shell: ShellConfig::default(),
            gdb: GdbConfig::default(),
        }
    }
}

/// Caller-side configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Server host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Default deadline for a blocking call.
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
    /// Deadline for establishing the TCP connection.
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// Largest frame the client decodes or encodes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            call_timeout_seconds: default_call_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    /// Default call deadline as a [`Duration`].
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Connect deadline as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Top-level configuration parsed from `gdbrpc.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Client settings.
    #[serde(default)]
    pub client: ClientConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "server.max_frame_bytes must be greater than zero".into(),
            ));
        }

        if self.server.queue_capacity == 0 {
            return Err(AppError::Config(
                "server.queue_capacity must be greater than zero".into(),
            ));
        }

        if self.server.gdb.program.trim().is_empty() {
            return Err(AppError::Config("server.gdb.program must not be empty".into()));
        }

        if self.client.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "client.max_frame_bytes must be greater than zero".into(),
            ));
        }

        if self.client.call_timeout_seconds == 0 {
            return Err(AppError::Config(
                "client.call_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.client.connect_timeout_seconds == 0 {
            return Err(AppError::Config(
                "client.connect_timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
