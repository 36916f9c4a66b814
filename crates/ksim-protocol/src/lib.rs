//! # ksim-protocol — kernel core contract
//!
//! Shared types and collaborator traits for the simulated kernel's
//! fault-escalation and event-notification core.
//!
//! The crate holds no runtime state and pulls in nothing beyond serde and
//! thiserror, so extension crates can depend on it without dragging in the
//! event bus or the escalator.
//!
//! ## Module Overview
//!
//! - [`event`] — `EventKind`, the closed catalog of kernel events
//! - [`fault`] — `FaultLevel`, `FaultReport`, `FaultCause`, `FaultPayload`
//! - [`ports`] — collaborator boundaries (extensions, console, power hooks)
//! - [`error`] — errors crossing those boundaries

pub mod error;
pub mod event;
pub mod fault;
pub mod ports;

pub use error::{ExtensionError, LevelParseError, TransportError};
pub use event::{EventKind, LoginErrorReason};
pub use fault::{
    CLAMPED_REBOOT_DELAY_SECS, FaultCause, FaultLevel, FaultPayload, FaultReport,
    MAX_REBOOT_DELAY_SECS, RawFaultLevel, SEVERE_REBOOT_DELAY_LIMIT_SECS, panic_message,
};
pub use ports::{
    Acknowledger, ConsoleTone, ExtensionHandle, ExtensionRegistry, OperatorConsole,
    RemoteTransport, ResetHook, Sleeper, Terminator,
};
