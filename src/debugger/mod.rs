//! Debugger abstraction.
//!
//! The [`Debugger`] trait is the only way the server touches the debugger's
//! command interpreter. The execution worker owns the single instance
//! exclusively; nothing else holds a reference to it. Stopping a running
//! target has to happen while the worker is blocked inside
//! [`Debugger::execute`], so that capability is split out into a separate
//! [`TargetStop`] handle obtained up front.

pub mod gdb;
pub mod mi;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::Result;

/// Non-reentrant command interpreter of a debugger.
pub trait Debugger: Send {
    /// Run one console command to completion and return its textual output.
    ///
    /// Commands that resume the target only return once the target stops
    /// again, which may be never without an interrupt.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Execution`](crate::AppError::Execution) when the
    /// debugger reports a failure (unknown command, invalid expression, no
    /// running target), or [`AppError::Debugger`](crate::AppError::Debugger)
    /// when the backend itself is broken.
    fn execute<'a>(
        &'a mut self,
        command: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Handle that can stop the target while a command is executing.
    fn stopper(&self) -> Arc<dyn TargetStop>;
}

/// Out-of-band "stop the target" capability.
pub trait TargetStop: Send + Sync {
    /// Ask the debugger to stop the running target.
    ///
    /// Returns as soon as the request is delivered; the blocked
    /// [`Debugger::execute`] call completes on its own afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Debugger`](crate::AppError::Debugger) if the
    /// request cannot be delivered.
    fn stop_target(&self) -> Result<()>;
}
