//! Process-backed collaborators used when the host supplies none.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use ksim_protocol::{Acknowledger, ConsoleTone, OperatorConsole, ResetHook, Sleeper, Terminator};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutConsole;

impl OperatorConsole for StdoutConsole {
    fn write_line(&self, tone: ConsoleTone, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        match tone {
            ConsoleTone::Neutral => writeln!(out, "{line}")?,
            ConsoleTone::Warning => writeln!(out, "[warning] {line}")?,
            ConsoleTone::Error => writeln!(out, "[error] {line}")?,
        }
        out.flush()
    }
}

/// Waits for one line on stdin. End of input counts as an acknowledgement.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinAcknowledger;

impl Acknowledger for StdinAcknowledger {
    fn wait_for_ack(&self) -> io::Result<()> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Aborts without unwinding. The escalator has already written the
/// diagnostic to stderr and the tracing channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessAbort;

impl Terminator for ProcessAbort {
    fn terminate(&self, diagnostic: &str) {
        debug!(%diagnostic, "aborting process");
        std::process::abort();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResetHook;

impl ResetHook for NoopResetHook {
    fn reset_everything(&self) {
        debug!("no reset hook installed");
    }
}
