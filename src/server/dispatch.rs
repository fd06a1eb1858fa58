//! Command routing.
//!
//! A command payload is a single console line. Its leading marker decides
//! where it runs:
//!
//! | Payload             | Route                                       |
//! |---------------------|---------------------------------------------|
//! | `!ls -l`            | [`Route::Shell`] with `ls -l`               |
//! | `shell ls -l`       | [`Route::Shell`] with `ls -l`               |
//! | `@name args…`       | [`Route::Handler`] named `name`             |
//! | *(anything else)*   | [`Route::Debugger`], passed through verbatim |

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::config::ShellConfig;
use crate::debugger::{Debugger, TargetStop};
use crate::server::shell;
use crate::{AppError, Result};

/// Keyword that routes a command to the host shell.
pub const SHELL_KEYWORD: &str = "shell";

/// Destination of a command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Hand the command to the debugger's interpreter.
    Debugger(&'a str),
    /// Run a host program.
    Shell(&'a str),
    /// Invoke a registered server-side handler.
    Handler {
        /// Registered handler name.
        name: &'a str,
        /// Remainder of the line after the name.
        args: &'a str,
    },
}

impl<'a> Route<'a> {
    /// Classify a command payload.
    #[must_use]
    pub fn parse(command: &'a str) -> Self {
        let command = command.trim();

        if let Some(rest) = command.strip_prefix('!') {
            return Self::Shell(rest.trim());
        }

        if let Some(rest) = command.strip_prefix(SHELL_KEYWORD) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return Self::Shell(rest.trim());
            }
        }

        if let Some(rest) = command.strip_prefix('@') {
            let (name, args) = rest
                .split_once(char::is_whitespace)
                .unwrap_or((rest, ""));
            return Self::Handler {
                name,
                args: args.trim(),
            };
        }

        Self::Debugger(command)
    }

    /// Whether executing this route may leave a target running, so an
    /// interrupt has to go through the debugger rather than cancel locally.
    #[must_use]
    pub fn controls_target(&self) -> bool {
        !matches!(self, Self::Shell(_))
    }
}

/// Named server-side operation with exclusive access to the debugger.
pub trait Handler: Send + Sync {
    /// Run the handler.
    ///
    /// # Errors
    ///
    /// Any error is reported to the caller as an execution failure.
    fn call<'a>(
        &'a self,
        debugger: &'a mut dyn Debugger,
        args: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Maps commands to concrete actions.
///
/// Owned by the execution worker; see [`queue`](crate::server::queue).
pub struct Dispatcher {
    debugger: Box<dyn Debugger>,
    shell: ShellConfig,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Dispatcher {
    /// Create a dispatcher around a debugger instance.
    #[must_use]
    pub fn new(debugger: Box<dyn Debugger>, shell: ShellConfig) -> Self {
        Self {
            debugger,
            shell,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Names of all registered handlers, sorted.
    #[must_use]
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop handle of the underlying debugger.
    #[must_use]
    pub fn stopper(&self) -> Arc<dyn TargetStop> {
        self.debugger.stopper()
    }

    /// Execute a routed command.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Execution` for shell failures, disabled shell
    /// access and unknown handlers; debugger and handler errors pass through.
    pub async fn dispatch(&mut self, route: Route<'_>) -> Result<String> {
        debug!(?route, "dispatching command");

        match route {
            Route::Debugger(command) => self.debugger.execute(command).await,
            Route::Shell(command) => {
                if !self.shell.enabled {
                    return Err(AppError::Execution(
                        "shell commands are disabled on this server".into(),
                    ));
                }
                shell::run(command).await
            }
            Route::Handler { name, args } => {
                let Some(handler) = self.handlers.get(name).cloned() else {
                    return Err(AppError::Execution(format!("unknown handler: {name}")));
                };
                handler.call(self.debugger.as_mut(), args).await
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("shell", &self.shell)
            .field("handlers", &self.handler_names())
            .finish_non_exhaustive()
    }
}
