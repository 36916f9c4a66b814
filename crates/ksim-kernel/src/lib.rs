//! Kernel facade: wires the event bus, power controller, dump writer and
//! fault escalator from a [`KernelConfig`] and host-supplied collaborators.

mod config;
mod escalator;
pub mod host;
mod template;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use indexmap::IndexMap;
use ksim_dump::PanicDumpWriter;
use ksim_events::{EventBus, EventLog, EventLogError, PublishReport, StaticExtensionRegistry};
use ksim_power::{PowerController, UdpRemoteTransport};
use ksim_protocol::{
    Acknowledger, EventKind, ExtensionRegistry, FaultReport, OperatorConsole, RemoteTransport,
    ResetHook, Sleeper, Terminator,
};
use serde_json::Value;
use tracing::{info, instrument};

pub use config::KernelConfig;
pub use escalator::{EscalationStats, FaultEscalator, FaultOutcome};
pub use template::{TemplateError, render_template};

use host::{NoopResetHook, ProcessAbort, StdinAcknowledger, StdoutConsole, ThreadSleeper};

pub struct KernelBuilder {
    config: KernelConfig,
    registry: Option<Arc<dyn ExtensionRegistry>>,
    console: Option<Arc<dyn OperatorConsole>>,
    acknowledger: Option<Arc<dyn Acknowledger>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    terminator: Option<Arc<dyn Terminator>>,
    reset: Option<Arc<dyn ResetHook>>,
    transport: Option<Arc<dyn RemoteTransport>>,
}

impl KernelBuilder {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self::from_config(KernelConfig::new(root))
    }

    pub fn from_config(config: KernelConfig) -> Self {
        Self {
            config,
            registry: None,
            console: None,
            acknowledger: None,
            sleeper: None,
            terminator: None,
            reset: None,
            transport: None,
        }
    }

    pub fn registry(mut self, registry: Arc<dyn ExtensionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn console(mut self, console: Arc<dyn OperatorConsole>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn acknowledger(mut self, acknowledger: Arc<dyn Acknowledger>) -> Self {
        self.acknowledger = Some(acknowledger);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    pub fn reset_hook(mut self, reset: Arc<dyn ResetHook>) -> Self {
        self.reset = Some(reset);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Kernel {
        let config = self.config;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(StaticExtensionRegistry::new()));
        let console = self.console.unwrap_or_else(|| Arc::new(StdoutConsole));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(UdpRemoteTransport::new(config.rpc_port)));

        let log = Arc::new(match config.event_log_capacity {
            Some(capacity) => EventLog::with_capacity_limit(capacity),
            None => EventLog::new(),
        });
        let bus = EventBus::new(registry, log);

        let power = Arc::new(PowerController::new(
            bus.clone(),
            console.clone(),
            self.reset.unwrap_or_else(|| Arc::new(NoopResetHook)),
            transport,
        ));
        let dumps = config
            .write_dumps
            .then(|| PanicDumpWriter::new(config.resolved_dump_dir(), console.clone()));
        let escalator = Arc::new(FaultEscalator::new(
            bus.clone(),
            power.clone(),
            dumps,
            console,
            self.acknowledger
                .unwrap_or_else(|| Arc::new(StdinAcknowledger)),
            self.sleeper.unwrap_or_else(|| Arc::new(ThreadSleeper)),
            self.terminator.unwrap_or_else(|| Arc::new(ProcessAbort)),
            config.show_stack_trace,
        ));

        info!(
            root = %config.root.display(),
            event_log_capacity = ?bus.log().capacity(),
            "kernel assembled"
        );
        Kernel {
            config: Arc::new(config),
            bus,
            power,
            escalator,
        }
    }
}

#[derive(Clone)]
pub struct Kernel {
    config: Arc<KernelConfig>,
    bus: EventBus,
    power: Arc<PowerController>,
    escalator: Arc<FaultEscalator>,
}

impl Kernel {
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        self.bus.log()
    }

    pub fn power(&self) -> &PowerController {
        &self.power
    }

    pub fn publish(&self, event: EventKind) -> Result<PublishReport, EventLogError> {
        self.bus.publish(event)
    }

    pub fn raise_fault(&self, report: FaultReport) -> FaultOutcome {
        self.escalator.raise_fault(report)
    }

    pub fn escalation_stats(&self) -> EscalationStats {
        self.escalator.stats()
    }

    /// Fired events whose label contains `filter`; empty lists all.
    #[instrument(skip(self))]
    pub fn fired_events(&self, filter: &str) -> IndexMap<String, Vec<Value>> {
        self.event_log().list_all(filter)
    }

    pub fn clear_fired_events(&self) {
        self.event_log().clear();
    }
}
