#![forbid(unsafe_code)]

//! Remote procedure bridge into a single GDB session.
//!
//! A [`server::Server`] owns one debugger and executes commands from any
//! number of TCP clients strictly one at a time; a [`client::Client`] issues
//! blocking calls, fire-and-forget posts, and interrupts.

pub mod client;
pub mod config;
pub mod debugger;
pub mod errors;
pub mod models;
pub mod server;
pub mod telemetry;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
