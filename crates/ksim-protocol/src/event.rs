//! Kernel event catalog.
//!
//! Every event the kernel can fire is a variant of [`EventKind`]. The variant
//! fixes the payload schema, so subscribers match on the kind instead of
//! parsing string keys. [`EventKind::payload`] flattens the fields into the
//! ordered value list that the fired-event log records.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::fault::FaultPayload;

/// Why a login attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginErrorReason {
    NotFound,
    WrongPassword,
    Disabled,
}

/// Closed catalog of kernel events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    // ── Kernel lifecycle ──
    StartKernel,
    KernelStarted,
    PreShutdown,
    PostShutdown,
    PreReboot,
    PostReboot,
    GarbageCollected,

    // ── Login and users ──
    PreLogin,
    PostLogin {
        username: String,
    },
    LoginError {
        username: String,
        reason: LoginErrorReason,
    },
    UserAdded {
        username: String,
    },
    UserRemoved {
        username: String,
    },

    // ── Shell ──
    ShellInitialized,
    PreExecuteCommand {
        command: String,
    },
    PostExecuteCommand {
        command: String,
    },
    CommandError {
        command: String,
        cause: String,
    },

    // ── Screensaver and lock ──
    PreShowScreensaver,
    PostShowScreensaver,
    PreUnlock,
    PostUnlock {
        screensaver: String,
    },

    // ── Configuration ──
    PreReloadConfig,
    PostReloadConfig,
    PreSaveConfig,
    PostSaveConfig,

    // ── Extensions ──
    ModsLoaded,
    ModsUnloaded,
    ModLoaded {
        mod_name: String,
    },
    ModUnloaded {
        mod_name: String,
    },
    ModFailedLoad {
        mod_name: String,
        reason: String,
    },

    // ── Faults ──
    KernelError(FaultPayload),
    ContKernelError(FaultPayload),
}

impl EventKind {
    /// Variant name, used to build fired-event labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartKernel => "StartKernel",
            Self::KernelStarted => "KernelStarted",
            Self::PreShutdown => "PreShutdown",
            Self::PostShutdown => "PostShutdown",
            Self::PreReboot => "PreReboot",
            Self::PostReboot => "PostReboot",
            Self::GarbageCollected => "GarbageCollected",
            Self::PreLogin => "PreLogin",
            Self::PostLogin { .. } => "PostLogin",
            Self::LoginError { .. } => "LoginError",
            Self::UserAdded { .. } => "UserAdded",
            Self::UserRemoved { .. } => "UserRemoved",
            Self::ShellInitialized => "ShellInitialized",
            Self::PreExecuteCommand { .. } => "PreExecuteCommand",
            Self::PostExecuteCommand { .. } => "PostExecuteCommand",
            Self::CommandError { .. } => "CommandError",
            Self::PreShowScreensaver => "PreShowScreensaver",
            Self::PostShowScreensaver => "PostShowScreensaver",
            Self::PreUnlock => "PreUnlock",
            Self::PostUnlock { .. } => "PostUnlock",
            Self::PreReloadConfig => "PreReloadConfig",
            Self::PostReloadConfig => "PostReloadConfig",
            Self::PreSaveConfig => "PreSaveConfig",
            Self::PostSaveConfig => "PostSaveConfig",
            Self::ModsLoaded => "ModsLoaded",
            Self::ModsUnloaded => "ModsUnloaded",
            Self::ModLoaded { .. } => "ModLoaded",
            Self::ModUnloaded { .. } => "ModUnloaded",
            Self::ModFailedLoad { .. } => "ModFailedLoad",
            Self::KernelError(_) => "KernelError",
            Self::ContKernelError(_) => "ContKernelError",
        }
    }

    /// Event arguments in schema order.
    pub fn payload(&self) -> Vec<Value> {
        match self {
            Self::PostLogin { username }
            | Self::UserAdded { username }
            | Self::UserRemoved { username } => vec![json!(username)],
            Self::LoginError { username, reason } => vec![json!(username), json!(reason)],
            Self::PreExecuteCommand { command } | Self::PostExecuteCommand { command } => {
                vec![json!(command)]
            }
            Self::CommandError { command, cause } => vec![json!(command), json!(cause)],
            Self::PostUnlock { screensaver } => vec![json!(screensaver)],
            Self::ModLoaded { mod_name } | Self::ModUnloaded { mod_name } => {
                vec![json!(mod_name)]
            }
            Self::ModFailedLoad { mod_name, reason } => vec![json!(mod_name), json!(reason)],
            Self::KernelError(fault) | Self::ContKernelError(fault) => fault.values(),
            Self::StartKernel
            | Self::KernelStarted
            | Self::PreShutdown
            | Self::PostShutdown
            | Self::PreReboot
            | Self::PostReboot
            | Self::GarbageCollected
            | Self::PreLogin
            | Self::ShellInitialized
            | Self::PreShowScreensaver
            | Self::PostShowScreensaver
            | Self::PreUnlock
            | Self::PreReloadConfig
            | Self::PostReloadConfig
            | Self::PreSaveConfig
            | Self::PostSaveConfig
            | Self::ModsLoaded
            | Self::ModsUnloaded => Vec::new(),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::KernelError(_) | Self::ContKernelError(_))
    }
}
