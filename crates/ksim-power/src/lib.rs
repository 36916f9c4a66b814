//! Power control for the simulated kernel.
//!
//! Local actions announce themselves on the event bus, raise the request
//! flags the boot loop reads, and hand teardown to the host's reset hook.
//! Remote actions only forward a request string to another instance.

mod transport;

use std::fmt;
use std::io;
use std::sync::Arc;

use ksim_events::{EventBus, EventLogError};
use ksim_protocol::{
    ConsoleTone, EventKind, OperatorConsole, RemoteTransport, ResetHook, TransportError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

pub use transport::{DEFAULT_RPC_PORT, UdpRemoteTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Shutdown,
    Reboot,
    /// Reboot into safe mode on the next boot.
    RebootSafe,
}

impl PowerAction {
    fn request_tag(self) -> &'static str {
        match self {
            Self::Shutdown => "Shutdown",
            Self::Reboot => "Reboot",
            Self::RebootSafe => "RebootSafe",
        }
    }

    /// Wire form of a remote request, e.g. `<Request:Shutdown>(10.0.0.2)`.
    pub fn remote_request(self, target: &str) -> String {
        format!("<Request:{}>({target})", self.request_tag())
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.request_tag())
    }
}

/// Flags read by the boot loop after a power action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PowerState {
    pub shutdown_requested: bool,
    pub reboot_requested: bool,
    pub logout_requested: bool,
    pub safe_mode: bool,
}

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("failed to record power event: {0}")]
    Publish(#[from] EventLogError),
    #[error("console write failed: {0}")]
    Console(#[from] io::Error),
    #[error("remote {action} request to {target} failed: {source}")]
    Remote {
        action: PowerAction,
        target: String,
        #[source]
        source: TransportError,
    },
}

pub struct PowerController {
    bus: EventBus,
    console: Arc<dyn OperatorConsole>,
    reset: Arc<dyn ResetHook>,
    transport: Arc<dyn RemoteTransport>,
    state: Mutex<PowerState>,
}

impl PowerController {
    pub fn new(
        bus: EventBus,
        console: Arc<dyn OperatorConsole>,
        reset: Arc<dyn ResetHook>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            bus,
            console,
            reset,
            transport,
            state: Mutex::new(PowerState::default()),
        }
    }

    pub fn perform(&self, action: PowerAction) -> Result<(), PowerError> {
        match action {
            PowerAction::Shutdown => self.shutdown(),
            PowerAction::Reboot => self.reboot(),
            PowerAction::RebootSafe => self.reboot_safe(),
        }
    }

    pub fn shutdown(&self) -> Result<(), PowerError> {
        self.local(PowerAction::Shutdown)
    }

    pub fn reboot(&self) -> Result<(), PowerError> {
        self.local(PowerAction::Reboot)
    }

    pub fn reboot_safe(&self) -> Result<(), PowerError> {
        self.local(PowerAction::RebootSafe)
    }

    pub fn remote_shutdown(&self, target: &str) -> Result<(), PowerError> {
        self.remote(PowerAction::Shutdown, target)
    }

    pub fn remote_reboot(&self, target: &str) -> Result<(), PowerError> {
        self.remote(PowerAction::Reboot, target)
    }

    pub fn remote_reboot_safe(&self, target: &str) -> Result<(), PowerError> {
        self.remote(PowerAction::RebootSafe, target)
    }

    pub fn state(&self) -> PowerState {
        *self.state.lock()
    }

    /// Read and clear the safe-mode flag; called once at boot.
    pub fn take_safe_mode(&self) -> bool {
        std::mem::take(&mut self.state.lock().safe_mode)
    }

    /// Clear the request flags once the kernel is back up. Safe mode is left
    /// for [`PowerController::take_safe_mode`].
    pub fn acknowledge_boot(&self) {
        let mut state = self.state.lock();
        state.shutdown_requested = false;
        state.reboot_requested = false;
        state.logout_requested = false;
    }

    #[instrument(skip(self))]
    fn local(&self, action: PowerAction) -> Result<(), PowerError> {
        let (pre, post, status) = match action {
            PowerAction::Shutdown => (
                EventKind::PreShutdown,
                EventKind::PostShutdown,
                "Shutting down...",
            ),
            PowerAction::Reboot | PowerAction::RebootSafe => {
                (EventKind::PreReboot, EventKind::PostReboot, "Rebooting...")
            }
        };

        self.bus.publish(pre)?;
        self.console.write_line(ConsoleTone::Neutral, status)?;
        {
            let mut state = self.state.lock();
            match action {
                PowerAction::Shutdown => state.shutdown_requested = true,
                PowerAction::Reboot => state.reboot_requested = true,
                PowerAction::RebootSafe => {
                    state.reboot_requested = true;
                    state.safe_mode = true;
                }
            }
            state.logout_requested = true;
        }

        self.reset.reset_everything();
        self.bus.publish(post)?;
        info!(%action, "power action completed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn remote(&self, action: PowerAction, target: &str) -> Result<(), PowerError> {
        let request = action.remote_request(target);
        self.transport
            .send(&request, target)
            .map_err(|source| PowerError::Remote {
                action,
                target: target.to_owned(),
                source,
            })?;
        info!(%request, "remote power request sent");
        Ok(())
    }
}
