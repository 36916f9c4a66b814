use std::fmt::{self, Write as _};

use chrono::{DateTime, Local};
use ksim_protocol::{FaultCause, FaultLevel};
use serde::Serialize;

/// One source location recovered from a cause's trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl StackFrame {
    fn is_empty(&self) -> bool {
        self.file.is_none() && self.line.is_none() && self.column.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CauseEntry {
    pub type_name: String,
    pub message: String,
    pub code: Option<i64>,
    pub origin: Option<String>,
    pub trace: Option<String>,
}

/// Snapshot of a fault, rendered once into a dump file.
#[derive(Debug, Clone, Serialize)]
pub struct PanicDump {
    pub description: String,
    pub level: FaultLevel,
    pub timestamp: DateTime<Local>,
    pub runtime: String,
    pub causes: Vec<CauseEntry>,
    pub frames: Vec<StackFrame>,
}

impl PanicDump {
    pub fn capture(description: &str, level: FaultLevel, cause: Option<&FaultCause>) -> Self {
        let causes: Vec<CauseEntry> = cause
            .into_iter()
            .flat_map(FaultCause::chain)
            .map(|cause| CauseEntry {
                type_name: cause.type_name.clone(),
                message: cause.message.clone(),
                code: cause.code,
                origin: cause.origin.clone(),
                trace: cause.trace.clone(),
            })
            .collect();

        let frames = causes
            .iter()
            .flat_map(|cause| match (&cause.trace, &cause.origin) {
                (Some(trace), _) => parse_frames(trace),
                (None, Some(origin)) => parse_frames(origin),
                (None, None) => Vec::new(),
            })
            .collect();

        Self {
            description: description.to_owned(),
            level,
            timestamp: Local::now(),
            runtime: runtime_identification(),
            causes,
            frames,
        }
    }

    /// `dmp_<date>_<time>.txt` with filename-unsafe characters replaced.
    pub fn file_name(&self) -> String {
        let date = self.timestamp.format("%Y/%m/%d").to_string();
        let time = self.timestamp.format("%H:%M:%S%.3f").to_string();
        format!("dmp_{}_{}.txt", sanitize(&date), sanitize(&time))
    }

    pub fn render(&self) -> Result<String, fmt::Error> {
        let mut out = String::new();
        self.render_into(&mut out)?;
        Ok(out)
    }

    pub fn render_into<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "---------------------------- Kernel panic dump ----------------------------")?;
        writeln!(out)?;
        writeln!(out, ">> Panic information <<")?;
        writeln!(out, "> Description: {}", self.description)?;
        writeln!(out, "> Error level: {} ({})", self.level, self.level.code())?;
        writeln!(out, "> Timestamp: {}", self.timestamp.to_rfc3339())?;
        writeln!(out, "> Runtime: {}", self.runtime)?;
        writeln!(out)?;

        if self.causes.is_empty() {
            writeln!(out, ">> No exception was attached to this fault <<")?;
            writeln!(out)?;
        }
        for (depth, cause) in self.causes.iter().enumerate() {
            if depth == 0 {
                writeln!(out, ">> Exception information <<")?;
            } else {
                writeln!(out, ">> Inner exception {depth} information <<")?;
            }
            writeln!(out, "> Exception: {}", cause.type_name)?;
            writeln!(out, "> Description: {}", cause.message)?;
            match cause.code {
                Some(code) => writeln!(out, "> Code: {code}")?,
                None => writeln!(out, "> Code: n/a")?,
            }
            writeln!(out, "> Origin: {}", cause.origin.as_deref().unwrap_or("unknown"))?;
            writeln!(out, "> Stack trace:")?;
            match cause.trace.as_deref().map(str::trim_end) {
                Some(trace) if !trace.is_empty() => writeln!(out, "{trace}")?,
                _ => writeln!(out, "    (no stack trace)")?,
            }
            writeln!(out)?;
        }

        if self.frames.is_empty() {
            writeln!(out, ">> No stack frames were available <<")?;
        } else {
            writeln!(out, ">> Frames <<")?;
            for (index, frame) in self.frames.iter().enumerate() {
                writeln!(
                    out,
                    "> Frame {index}: file {}, line {}, column {}",
                    frame.file.as_deref().unwrap_or("?"),
                    display_or_unknown(frame.line),
                    display_or_unknown(frame.column),
                )?;
            }
        }
        Ok(())
    }
}

/// Source locations found in backtrace text.
///
/// Accepts `at path:line:column` lines as printed by `std::backtrace` and
/// bare `path:line[:column]` lines; lines without a location are skipped.
pub fn parse_frames(trace: &str) -> Vec<StackFrame> {
    trace
        .lines()
        .filter_map(parse_frame)
        .filter(|frame| !frame.is_empty())
        .collect()
}

fn parse_frame(line: &str) -> Option<StackFrame> {
    let text = line.trim();
    let text = text.strip_prefix("at ").unwrap_or(text);
    let mut parts = text.rsplitn(3, ':');
    let last = parts.next()?.parse::<u32>().ok()?;
    let middle = parts.next()?;
    let rest = parts.next();

    let (file, line, column) = match (middle.parse::<u32>(), rest) {
        (Ok(line), Some(file)) => (file.to_owned(), line, Some(last)),
        // `C:\src\main.rs:10` splits at the drive colon.
        (Err(_), Some(drive)) => (format!("{drive}:{middle}"), last, None),
        (_, None) => (middle.to_owned(), last, None),
    };
    if file.is_empty() || file.contains(char::is_whitespace) {
        return None;
    }
    Some(StackFrame {
        file: Some(file),
        line: Some(line),
        column,
    })
}

fn display_or_unknown(value: Option<u32>) -> String {
    value.map_or_else(|| "?".to_owned(), |value| value.to_string())
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '.' | ' ' => '-',
            other => other,
        })
        .collect()
}

fn runtime_identification() -> String {
    format!(
        "ksim {} ({}-{}, pid {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH,
        std::env::consts::OS,
        std::process::id()
    )
}
