//! Collaborator ports for the kernel core.
//!
//! These traits are the only boundary between the core (event bus, power
//! controller, fault escalator) and the rest of the simulated kernel: the mod
//! loader, the terminal, the session/worker teardown, and the RPC layer.
//!
//! All calls are synchronous and may block; the core never adds timeouts.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExtensionError, TransportError};
use crate::event::EventKind;

/// A loaded extension able to receive kernel events.
pub trait ExtensionHandle: Send + Sync {
    fn name(&self) -> &str;
    fn notify(&self, event: &EventKind) -> Result<(), ExtensionError>;
}

/// Source of the currently loaded extensions.
///
/// The bus takes a fresh snapshot on every publish, so extensions loaded or
/// unloaded mid-publish only affect later events.
pub trait ExtensionRegistry: Send + Sync {
    fn enumerate(&self) -> Vec<Arc<dyn ExtensionHandle>>;
}

/// Stops background workers, drops sessions, and clears transient state
/// before a power transition.
pub trait ResetHook: Send + Sync {
    fn reset_everything(&self);
}

/// Delivers power requests to another kernel instance.
pub trait RemoteTransport: Send + Sync {
    fn send(&self, request: &str, target: &str) -> Result<(), TransportError>;
}

/// Blocks until the operator confirms (a keypress or a line of input).
pub trait Acknowledger: Send + Sync {
    fn wait_for_ack(&self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleTone {
    Neutral,
    Warning,
    Error,
}

/// Plain-text status lines shown to the operator.
pub trait OperatorConsole: Send + Sync {
    fn write_line(&self, tone: ConsoleTone, line: &str) -> io::Result<()>;
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Ends the process after a triple fault. Implementations outside tests
/// must not return.
pub trait Terminator: Send + Sync {
    fn terminate(&self, diagnostic: &str);
}
