//! Panic dump artifacts.
//!
//! A dump is written once per fault that reaches dump generation and is not
//! kept in memory afterwards. Writing never fails the caller: errors are
//! reported to the operator console and the tracing channel, and the fault
//! handling continues without a dump.

mod dump;

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ksim_protocol::{ConsoleTone, FaultCause, FaultLevel, OperatorConsole};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

pub use dump::{CauseEntry, PanicDump, StackFrame, parse_frames};

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to create dump directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write dump {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to format dump: {0}")]
    Format(#[from] fmt::Error),
}

#[derive(Clone)]
pub struct PanicDumpWriter {
    dump_dir: PathBuf,
    console: Arc<dyn OperatorConsole>,
}

impl PanicDumpWriter {
    pub fn new(dump_dir: impl Into<PathBuf>, console: Arc<dyn OperatorConsole>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            console,
        }
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    /// Write a dump, reporting any failure instead of returning it.
    #[instrument(skip(self, description, level, cause), fields(level = %level, has_cause = cause.is_some()))]
    pub fn write(
        &self,
        description: &str,
        level: FaultLevel,
        cause: Option<&FaultCause>,
    ) -> Option<PathBuf> {
        match self.try_write(description, level, cause) {
            Ok(path) => {
                info!(path = %path.display(), "panic dump written");
                Some(path)
            }
            Err(dump_error) => {
                error!(error = %dump_error, "panic dump could not be written");
                let line = format!("Dump information could not be written: {dump_error}");
                if let Err(console_error) = self.console.write_line(ConsoleTone::Error, &line) {
                    warn!(error = %console_error, "console unavailable while reporting dump failure");
                }
                None
            }
        }
    }

    pub fn try_write(
        &self,
        description: &str,
        level: FaultLevel,
        cause: Option<&FaultCause>,
    ) -> Result<PathBuf, DumpError> {
        let dump = PanicDump::capture(description, level, cause);
        let text = dump.render()?;

        fs::create_dir_all(&self.dump_dir).map_err(|source| DumpError::CreateDir {
            path: self.dump_dir.clone(),
            source,
        })?;

        let (path, mut file) = self.create_unique(&dump.file_name())?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|source| DumpError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Two faults within the same millisecond get `_1`, `_2`, ... suffixes.
    fn create_unique(&self, file_name: &str) -> Result<(PathBuf, File), DumpError> {
        let stem = file_name.trim_end_matches(".txt");
        let mut attempt = 0_u32;
        loop {
            let path = if attempt == 0 {
                self.dump_dir.join(file_name)
            } else {
                self.dump_dir.join(format!("{stem}_{attempt}.txt"))
            };
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(source) if source.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                }
                Err(source) => return Err(DumpError::Write { path, source }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use ksim_protocol::{ConsoleTone, FaultCause, FaultLevel, OperatorConsole};
    use parking_lot::Mutex;

    use crate::PanicDumpWriter;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[derive(Default)]
    struct RecordingConsole {
        lines: Mutex<Vec<(ConsoleTone, String)>>,
    }

    impl OperatorConsole for RecordingConsole {
        fn write_line(&self, tone: ConsoleTone, line: &str) -> std::io::Result<()> {
            self.lines.lock().push((tone, line.to_owned()));
            Ok(())
        }
    }

    #[test]
    fn writes_dump_with_cause_chain() -> Result<()> {
        let root = unique_test_root("ksim-dump");
        let console = Arc::new(RecordingConsole::default());
        let writer = PanicDumpWriter::new(root.join("dumps"), console.clone());

        let cause = FaultCause::new("ksim::DriverError", "disk controller stalled")
            .with_trace("   0: ksim::driver::poll\n             at src/driver.rs:88:9\n");
        let path = writer
            .write("driver stalled", FaultLevel::Fatal, Some(&cause))
            .expect("dump should be written");

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("dmp_") && name.ends_with(".txt"));

        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("> Description: driver stalled"));
        assert!(text.contains("> Exception: ksim::DriverError"));
        assert!(text.contains("> Frame 0: file src/driver.rs, line 88, column 9"));
        assert!(console.lines.lock().is_empty());

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn same_millisecond_dumps_do_not_collide() -> Result<()> {
        let root = unique_test_root("ksim-dump-collide");
        let writer = PanicDumpWriter::new(&root, Arc::new(RecordingConsole::default()));

        let first = writer.try_write("one", FaultLevel::Serious, None)?;
        let second = writer.try_write("two", FaultLevel::Serious, None)?;
        assert_ne!(first, second);

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn unwritable_directory_is_reported_not_propagated() -> Result<()> {
        let root = unique_test_root("ksim-dump-blocked");
        std::fs::create_dir_all(&root)?;
        let blocker = root.join("not-a-dir");
        std::fs::write(&blocker, "occupied")?;

        let console = Arc::new(RecordingConsole::default());
        let writer = PanicDumpWriter::new(blocker.join("dumps"), console.clone());
        assert!(writer.write("boom", FaultLevel::Serious, None).is_none());

        let lines = console.lines.lock();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, ConsoleTone::Error);
        assert!(lines[0].1.contains("could not be written"));

        drop(lines);
        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }
}
