//! Fault escalation.
//!
//! Every fault runs through [`FaultEscalator::raise_fault`], which drives a
//! loop of single steps. A step validates and normalizes the report,
//! publishes it, writes a dump, and then either resumes, performs a power
//! action, or hands back a new report to escalate to. A step that fails or
//! panics is itself a kernel bug and becomes a double fault; a failure while
//! a double fault is being handled is a triple fault and terminates the
//! process.

use std::backtrace::BacktraceStatus;
use std::io::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ksim_dump::PanicDumpWriter;
use ksim_events::EventBus;
use ksim_power::{PowerAction, PowerController};
use ksim_protocol::{
    Acknowledger, CLAMPED_REBOOT_DELAY_SECS, ConsoleTone, EventKind, FaultCause, FaultLevel,
    FaultPayload, FaultReport, MAX_REBOOT_DELAY_SECS, OperatorConsole,
    SEVERE_REBOOT_DELAY_LIMIT_SECS, Sleeper, Terminator, panic_message,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::template::render_template;

/// How a call to [`FaultEscalator::raise_fault`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOutcome {
    /// A continuable fault was acknowledged.
    Resumed,
    Rebooted,
    ShutDown,
    /// The process was asked to terminate after a triple fault. Only
    /// observable when the installed terminator returns.
    Terminated,
}

/// Counters since the escalator was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscalationStats {
    pub raised: u64,
    pub escalations: u64,
    pub kernel_bugs: u64,
    pub triple_faults: u64,
}

#[derive(Debug)]
enum Transition {
    Resume,
    Escalate(FaultReport),
    Power(PowerAction),
    Abort(String),
}

/// Every escalated report is a well-formed Double, so one escalation per
/// raised fault is enough; a second one means the machine is looping.
const MAX_ESCALATIONS: u32 = 1;

struct StepFailure {
    message: String,
    cause: FaultCause,
}

impl StepFailure {
    fn from_error(error: &anyhow::Error) -> Self {
        let source: &(dyn std::error::Error + 'static) = error.as_ref();
        let mut cause = FaultCause::from_dyn_error(source);
        cause.type_name = "anyhow::Error".to_owned();
        let backtrace = error.backtrace();
        if backtrace.status() == BacktraceStatus::Captured {
            cause = cause.with_trace(backtrace.to_string());
        }
        Self {
            message: format!("{error:#}"),
            cause,
        }
    }

    fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        Self {
            message: panic_message(payload),
            cause: FaultCause::from_panic(payload),
        }
    }
}

pub struct FaultEscalator {
    bus: EventBus,
    power: Arc<PowerController>,
    dumps: Option<PanicDumpWriter>,
    console: Arc<dyn OperatorConsole>,
    acknowledger: Arc<dyn Acknowledger>,
    sleeper: Arc<dyn Sleeper>,
    terminator: Arc<dyn Terminator>,
    show_stack_trace: bool,
    stats: Mutex<EscalationStats>,
}

impl FaultEscalator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        power: Arc<PowerController>,
        dumps: Option<PanicDumpWriter>,
        console: Arc<dyn OperatorConsole>,
        acknowledger: Arc<dyn Acknowledger>,
        sleeper: Arc<dyn Sleeper>,
        terminator: Arc<dyn Terminator>,
        show_stack_trace: bool,
    ) -> Self {
        Self {
            bus,
            power,
            dumps,
            console,
            acknowledger,
            sleeper,
            terminator,
            show_stack_trace,
            stats: Mutex::new(EscalationStats::default()),
        }
    }

    pub fn stats(&self) -> EscalationStats {
        self.stats.lock().clone()
    }

    /// Handle a fault until it resumes, powers the kernel off or down, or
    /// terminates the process. Never returns an error: failures while
    /// handling a fault are escalated, not propagated.
    #[instrument(skip(self, report), fields(level = %report.level))]
    pub fn raise_fault(&self, report: FaultReport) -> FaultOutcome {
        self.stats.lock().raised += 1;
        let mut report = report;
        let mut escalations = 0;
        loop {
            match self.attempt(&report) {
                Transition::Resume => return FaultOutcome::Resumed,
                Transition::Power(PowerAction::Shutdown) => return FaultOutcome::ShutDown,
                Transition::Power(PowerAction::Reboot | PowerAction::RebootSafe) => {
                    return FaultOutcome::Rebooted;
                }
                Transition::Escalate(next) if escalations >= MAX_ESCALATIONS => {
                    let diagnostic =
                        format!("escalated fault escalated again: {}", next.description);
                    return self.abort(&report, &diagnostic);
                }
                Transition::Escalate(next) => {
                    escalations += 1;
                    self.stats.lock().escalations += 1;
                    info!(from = %report.level, reason = %next.description, "escalating fault");
                    report = next;
                }
                Transition::Abort(diagnostic) => return self.abort(&report, &diagnostic),
            }
        }
    }

    /// Run one step, turning any failure into the next transition. Only a
    /// failure while this call handles a Double report is fatal.
    fn attempt(&self, report: &FaultReport) -> Transition {
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| self.run_step(report))) {
            Ok(Ok(transition)) => return transition,
            Ok(Err(error)) => StepFailure::from_error(&error),
            Err(payload) => StepFailure::from_panic(payload.as_ref()),
        };

        if report.level.known() == Some(FaultLevel::Double) {
            return Transition::Abort(format!(
                "failure while handling a double fault: {}",
                failure.message
            ));
        }
        self.stats.lock().kernel_bugs += 1;

        error!(error = %failure.message, "fault handling failed; treating as a kernel bug");
        Transition::Escalate(
            FaultReport::double(format!("kernel bug: {}", failure.message))
                .caused_by(failure.cause),
        )
    }

    fn run_step(&self, report: &FaultReport) -> Result<Transition> {
        let transition = self.step(report)?;
        if let Transition::Power(action) = transition {
            self.power
                .perform(action)
                .with_context(|| format!("power action {action} failed"))?;
        }
        Ok(transition)
    }

    fn step(&self, report: &FaultReport) -> Result<Transition> {
        let Some(level) = report.level.known() else {
            warn!(level = %report.level, "fault raised with an invalid level");
            return Ok(Transition::Escalate(FaultReport::double(
                "invalid error level",
            )));
        };

        let mut reboot = report.reboot_requested;
        let mut delay = report.reboot_delay_secs;

        if level.forces_reboot() && delay > SEVERE_REBOOT_DELAY_LIMIT_SECS {
            warn!(%level, delay, "reboot delay too long for this level");
            return Ok(Transition::Escalate(FaultReport::double(format!(
                "reboot time exceeds the {SEVERE_REBOOT_DELAY_LIMIT_SECS}-second limit \
                 for this level"
            ))));
        }

        if level.forces_reboot() && !reboot {
            reboot = true;
            self.warning(&format!("{level} faults always reboot; reboot forced"))?;
        }

        if delay > MAX_REBOOT_DELAY_SECS {
            self.warning(&format!(
                "reboot delay of {delay} seconds exceeds {MAX_REBOOT_DELAY_SECS}; \
                 using {CLAMPED_REBOOT_DELAY_SECS} seconds"
            ))?;
            delay = CLAMPED_REBOOT_DELAY_SECS;
        }

        let description = render_template(&report.description, &report.variables)
            .context("failed rendering fault description")?;

        let payload = FaultPayload {
            level,
            reboot_requested: reboot,
            reboot_delay_secs: delay,
            description: description.clone(),
            cause: report.cause.clone(),
            variables: report.variables.clone(),
        };
        self.bus
            .publish(EventKind::KernelError(payload.clone()))
            .context("failed recording KernelError")?;
        if level == FaultLevel::Continuable {
            self.bus
                .publish(EventKind::ContKernelError(payload))
                .context("failed recording ContKernelError")?;
        }

        self.write_dump(&description, level, report.cause.as_ref());

        let code = level.code();
        match level {
            FaultLevel::Double => {
                self.line(
                    ConsoleTone::Error,
                    &format!("[{code}] dpanic: {description} -- Rebooting in {delay} seconds..."),
                )?;
                self.sleeper.sleep(Duration::from_secs(delay));
                Ok(Transition::Power(PowerAction::Reboot))
            }
            FaultLevel::Continuable => {
                if reboot {
                    self.warning("continuable faults never reboot; reboot request ignored")?;
                }
                self.line(
                    ConsoleTone::Error,
                    &format!("[{code}] panic: {description} -- Press any key to continue..."),
                )?;
                self.print_stack_trace(report.cause.as_ref())?;
                self.acknowledger
                    .wait_for_ack()
                    .context("failed waiting for acknowledgement")?;
                Ok(Transition::Resume)
            }
            FaultLevel::Serious | FaultLevel::Fatal | FaultLevel::Unrecoverable if reboot => {
                self.line(
                    ConsoleTone::Error,
                    &format!("[{code}] panic: {description} -- Rebooting in {delay} seconds..."),
                )?;
                self.countdown(delay)?;
                Ok(Transition::Power(PowerAction::Reboot))
            }
            FaultLevel::Serious | FaultLevel::Fatal | FaultLevel::Unrecoverable => {
                self.line(
                    ConsoleTone::Error,
                    &format!("[{code}] panic: {description} -- Press any key to shut down..."),
                )?;
                self.print_stack_trace(report.cause.as_ref())?;
                self.acknowledger
                    .wait_for_ack()
                    .context("failed waiting for acknowledgement")?;
                Ok(Transition::Power(PowerAction::Shutdown))
            }
        }
    }

    /// Dump failures are reported by the writer and never stop the step.
    fn write_dump(&self, description: &str, level: FaultLevel, cause: Option<&FaultCause>) {
        let Some(dumps) = &self.dumps else {
            debug!("dump writing disabled");
            return;
        };
        let written =
            panic::catch_unwind(AssertUnwindSafe(|| dumps.write(description, level, cause)));
        if let Err(payload) = written {
            let message = panic_message(payload.as_ref());
            error!(error = %message, "dump writer panicked");
            let _ = self.console.write_line(
                ConsoleTone::Error,
                &format!("Dump information could not be written: {message}"),
            );
        }
    }

    fn print_stack_trace(&self, cause: Option<&FaultCause>) -> Result<()> {
        let Some(cause) = cause.filter(|_| self.show_stack_trace) else {
            return Ok(());
        };
        for (depth, link) in cause.chain().enumerate() {
            let prefix = if depth == 0 { "Caused by" } else { "Inner" };
            self.line(ConsoleTone::Neutral, &format!("{prefix}: {link}"))?;
            if let Some(trace) = &link.trace {
                for frame in trace.lines() {
                    self.line(ConsoleTone::Neutral, frame)?;
                }
            } else if let Some(origin) = &link.origin {
                self.line(ConsoleTone::Neutral, &format!("   at {origin}"))?;
            }
        }
        Ok(())
    }

    fn countdown(&self, seconds: u64) -> Result<()> {
        for remaining in (1..=seconds).rev() {
            self.line(ConsoleTone::Neutral, &format!("{remaining}..."))?;
            self.sleeper.sleep(Duration::from_secs(1));
        }
        Ok(())
    }

    fn warning(&self, message: &str) -> Result<()> {
        warn!(%message, "fault normalized");
        self.line(ConsoleTone::Warning, message)
    }

    fn line(&self, tone: ConsoleTone, text: &str) -> Result<()> {
        self.console
            .write_line(tone, text)
            .context("failed writing to the operator console")
    }

    fn abort(&self, report: &FaultReport, diagnostic: &str) -> FaultOutcome {
        self.stats.lock().triple_faults += 1;
        let message = format!(
            "TRIPLE FAULT: {diagnostic} (while handling {} fault: {})",
            report.level, report.description
        );
        error!(%message, "terminating");
        let _ = writeln!(std::io::stderr().lock(), "{message}");
        self.terminator.terminate(&message);
        FaultOutcome::Terminated
    }
}
