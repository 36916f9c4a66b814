//! Recording collaborators shared by the kernel tests.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ksim_events::{EventLog, StaticExtensionRegistry};
use ksim_protocol::{
    Acknowledger, ConsoleTone, OperatorConsole, RemoteTransport, ResetHook, Sleeper, Terminator,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::{Kernel, KernelBuilder, KernelConfig};

pub(crate) fn unique_test_root(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("{name}-{nanos}"))
}

#[derive(Default)]
pub(crate) struct RecordingConsole {
    lines: Mutex<Vec<(ConsoleTone, String)>>,
}

impl RecordingConsole {
    pub fn lines(&self) -> Vec<(ConsoleTone, String)> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, tone: ConsoleTone, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(seen, line)| *seen == tone && line.contains(needle))
    }
}

impl OperatorConsole for RecordingConsole {
    fn write_line(&self, tone: ConsoleTone, line: &str) -> io::Result<()> {
        self.lines.lock().push((tone, line.to_owned()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CountingAcknowledger {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl Acknowledger for CountingAcknowledger {
    fn wait_for_ack(&self) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "console detached"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    pub panic_on_sleep: bool,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        if self.panic_on_sleep {
            panic!("timer device lost");
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingTerminator {
    diagnostics: Mutex<Vec<String>>,
}

impl RecordingTerminator {
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.lock().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, diagnostic: &str) {
        self.diagnostics.lock().push(diagnostic.to_owned());
    }
}

#[derive(Default)]
pub(crate) struct CountingResetHook {
    pub calls: AtomicUsize,
}

impl ResetHook for CountingResetHook {
    fn reset_everything(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RemoteTransport for RecordingTransport {
    fn send(&self, request: &str, target: &str) -> Result<(), TransportError> {
        self.sent.lock().push((request.to_owned(), target.to_owned()));
        Ok(())
    }
}

/// A kernel wired to recording fakes, rooted in a fresh temp directory.
pub(crate) struct Harness {
    pub kernel: Kernel,
    pub root: PathBuf,
    pub registry: Arc<StaticExtensionRegistry>,
    pub console: Arc<RecordingConsole>,
    pub acks: Arc<CountingAcknowledger>,
    pub sleeper: Arc<RecordingSleeper>,
    pub terminator: Arc<RecordingTerminator>,
    pub resets: Arc<CountingResetHook>,
    pub transport: Arc<RecordingTransport>,
}

pub(crate) struct HarnessOptions {
    pub failing_ack: bool,
    pub panicking_sleeper: bool,
}

impl Harness {
    pub fn new(name: &str) -> Self {
        Self::with(name, |_| {}, HarnessOptions::none())
    }

    pub fn configured(name: &str, configure: impl FnOnce(&mut KernelConfig)) -> Self {
        Self::with(name, configure, HarnessOptions::none())
    }

    pub fn with(
        name: &str,
        configure: impl FnOnce(&mut KernelConfig),
        options: HarnessOptions,
    ) -> Self {
        let root = unique_test_root(name);
        let mut config = KernelConfig::new(&root);
        configure(&mut config);

        let registry = Arc::new(StaticExtensionRegistry::new());
        let console = Arc::new(RecordingConsole::default());
        let acks = Arc::new(CountingAcknowledger {
            fail: options.failing_ack,
            ..CountingAcknowledger::default()
        });
        let sleeper = Arc::new(RecordingSleeper {
            panic_on_sleep: options.panicking_sleeper,
            ..RecordingSleeper::default()
        });
        let terminator = Arc::new(RecordingTerminator::default());
        let resets = Arc::new(CountingResetHook::default());
        let transport = Arc::new(RecordingTransport::default());

        let kernel = KernelBuilder::from_config(config)
            .registry(registry.clone())
            .console(console.clone())
            .acknowledger(acks.clone())
            .sleeper(sleeper.clone())
            .terminator(terminator.clone())
            .reset_hook(resets.clone())
            .transport(transport.clone())
            .build();

        Self {
            kernel,
            root,
            registry,
            console,
            acks,
            sleeper,
            terminator,
            resets,
            transport,
        }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        self.kernel.event_log()
    }

    /// Payloads of every recorded `KernelError`, oldest first.
    pub fn kernel_errors(&self) -> Vec<Vec<Value>> {
        self.log()
            .records()
            .into_iter()
            .filter(|record| record.kind_name == "KernelError")
            .map(|record| record.payload)
            .collect()
    }

    pub fn ack_count(&self) -> usize {
        self.acks.calls.load(Ordering::SeqCst)
    }
}

impl HarnessOptions {
    pub fn none() -> Self {
        Self {
            failing_ack: false,
            panicking_sleeper: false,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}
