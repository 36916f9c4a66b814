//! Event bus and fired-event log.

mod event_log;
mod registry;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ksim_protocol::{EventKind, ExtensionRegistry, panic_message};
use tracing::{debug, instrument, warn};

pub use event_log::{EventLog, EventLogError, EventRecord};
pub use registry::{FnExtension, StaticExtensionRegistry};

/// Outcome of one publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub label: String,
    pub delivered: usize,
    pub failed: usize,
}

/// Broadcasts kernel events to every loaded extension and records them.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<dyn ExtensionRegistry>,
    log: Arc<EventLog>,
}

impl EventBus {
    pub fn new(registry: Arc<dyn ExtensionRegistry>, log: Arc<EventLog>) -> Self {
        Self { registry, log }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Notify each extension in registry order, then append one log record.
    ///
    /// An extension that errors or panics is logged and skipped; it never
    /// stops the remaining extensions and never fails the publish. The only
    /// error is a failed log append, which callers must treat as fatal.
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub fn publish(&self, event: EventKind) -> Result<PublishReport, EventLogError> {
        let handles = self.registry.enumerate();
        let mut delivered = 0;
        let mut failed = 0;

        for handle in &handles {
            match panic::catch_unwind(AssertUnwindSafe(|| handle.notify(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(error)) => {
                    failed += 1;
                    warn!(
                        extension = handle.name(),
                        event = event.name(),
                        %error,
                        "extension failed to handle event"
                    );
                }
                Err(payload) => {
                    failed += 1;
                    warn!(
                        extension = handle.name(),
                        event = event.name(),
                        panic = %panic_message(payload.as_ref()),
                        "extension panicked while handling event"
                    );
                }
            }
        }

        let record = self.log.append(&event)?;
        debug!(label = %record.label, delivered, failed, "event recorded");
        Ok(PublishReport {
            label: record.label,
            delivered,
            failed,
        })
    }
}
