//! Fault model: levels, reports, and captured causes.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::panic::Location;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::LevelParseError;

/// Upper bound for any reboot delay; larger values are reset to
/// [`CLAMPED_REBOOT_DELAY_SECS`].
pub const MAX_REBOOT_DELAY_SECS: u64 = 3600;
pub const CLAMPED_REBOOT_DELAY_SECS: u64 = 60;
/// Delay ceiling for `Double` and `Unrecoverable` faults.
pub const SEVERE_REBOOT_DELAY_LIMIT_SECS: u64 = 5;

/// Severity and recoverability of a kernel fault.
///
/// The levels are deliberately unordered: only `Double` and `Unrecoverable`
/// share escalation rules, and only `Continuable` resumes the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultLevel {
    Continuable,
    Serious,
    Double,
    Fatal,
    Unrecoverable,
}

impl FaultLevel {
    pub const ALL: [FaultLevel; 5] = [
        FaultLevel::Continuable,
        FaultLevel::Serious,
        FaultLevel::Double,
        FaultLevel::Fatal,
        FaultLevel::Unrecoverable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continuable => "continuable",
            Self::Serious => "serious",
            Self::Double => "double",
            Self::Fatal => "fatal",
            Self::Unrecoverable => "unrecoverable",
        }
    }

    /// One-letter code shown on panic lines.
    pub fn code(self) -> char {
        match self {
            Self::Continuable => 'C',
            Self::Serious => 'S',
            Self::Double => 'D',
            Self::Fatal => 'F',
            Self::Unrecoverable => 'U',
        }
    }

    /// Levels that must reboot and may not wait longer than
    /// [`SEVERE_REBOOT_DELAY_LIMIT_SECS`].
    pub fn forces_reboot(self) -> bool {
        matches!(self, Self::Double | Self::Unrecoverable)
    }
}

impl fmt::Display for FaultLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultLevel {
    type Err = LevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| {
                level.as_str().eq_ignore_ascii_case(trimmed)
                    || (trimmed.len() == 1
                        && trimmed
                            .chars()
                            .next()
                            .is_some_and(|c| c.eq_ignore_ascii_case(&level.code())))
            })
            .ok_or_else(|| LevelParseError(trimmed.to_owned()))
    }
}

/// Level exactly as a caller reported it.
///
/// Callers outside the core (shell commands, extensions) may hand over a level
/// the kernel does not know; the escalator turns those into a double fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFaultLevel {
    Known(FaultLevel),
    Unknown(String),
}

impl RawFaultLevel {
    pub fn parse(input: &str) -> Self {
        input
            .parse()
            .map(Self::Known)
            .unwrap_or_else(|_| Self::Unknown(input.to_owned()))
    }

    pub fn known(&self) -> Option<FaultLevel> {
        match self {
            Self::Known(level) => Some(*level),
            Self::Unknown(_) => None,
        }
    }
}

impl From<FaultLevel> for RawFaultLevel {
    fn from(level: FaultLevel) -> Self {
        Self::Known(level)
    }
}

impl fmt::Display for RawFaultLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(level) => level.fmt(f),
            Self::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// A fault as reported to the escalator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultReport {
    pub level: RawFaultLevel,
    pub reboot_requested: bool,
    pub reboot_delay_secs: u64,
    /// Positional template (`{0}`, `{1}`, ...) rendered against `variables`.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FaultCause>,
    #[serde(default)]
    pub variables: Vec<Value>,
}

impl FaultReport {
    pub fn new(level: impl Into<RawFaultLevel>, description: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            reboot_requested: false,
            reboot_delay_secs: 0,
            description: description.into(),
            cause: None,
            variables: Vec::new(),
        }
    }

    /// The report the kernel raises against itself when escalating.
    pub fn double(description: impl Into<String>) -> Self {
        Self::new(FaultLevel::Double, description)
            .reboot_after(SEVERE_REBOOT_DELAY_LIMIT_SECS)
    }

    pub fn reboot(mut self, requested: bool) -> Self {
        self.reboot_requested = requested;
        self
    }

    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.reboot_delay_secs = secs;
        self
    }

    /// Request a reboot after `secs` seconds.
    pub fn reboot_after(self, secs: u64) -> Self {
        self.reboot(true).delay_secs(secs)
    }

    pub fn caused_by(mut self, cause: FaultCause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn variable(mut self, value: impl Into<Value>) -> Self {
        self.variables.push(value.into());
        self
    }

    pub fn variables(mut self, values: Vec<Value>) -> Self {
        self.variables = values;
        self
    }
}

/// Normalized fault fields carried by `KernelError` and `ContKernelError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultPayload {
    pub level: FaultLevel,
    pub reboot_requested: bool,
    pub reboot_delay_secs: u64,
    /// Rendered description.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FaultCause>,
    #[serde(default)]
    pub variables: Vec<Value>,
}

impl FaultPayload {
    pub fn values(&self) -> Vec<Value> {
        vec![
            json!(self.level),
            json!(self.reboot_requested),
            json!(self.reboot_delay_secs),
            json!(self.description),
            self.cause
                .as_ref()
                .and_then(|cause| serde_json::to_value(cause).ok())
                .unwrap_or(Value::Null),
            Value::Array(self.variables.clone()),
        ]
    }
}

/// One node of a captured error chain.
///
/// Rust errors are not kept alive past the fault: the chain is flattened into
/// owned text when the fault is reported, so reports can be cloned, published,
/// and written to a dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultCause {
    pub type_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<FaultCause>>,
}

impl FaultCause {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            code: None,
            origin: None,
            trace: None,
            inner: None,
        }
    }

    /// Capture `error` and its `source()` chain.
    ///
    /// The caller's location becomes the origin of the outermost cause. A
    /// backtrace is attached when `RUST_BACKTRACE` enables capture.
    #[track_caller]
    pub fn from_error<E: Error + 'static>(error: &E) -> Self {
        let origin = Location::caller().to_string();
        let mut cause = Self::from_dyn_error(error);
        cause.type_name = std::any::type_name::<E>().to_owned();
        cause.origin = Some(origin);
        cause.trace = captured_backtrace();
        cause
    }

    /// Capture a type-erased error and its `source()` chain.
    pub fn from_dyn_error(error: &(dyn Error + 'static)) -> Self {
        let mut cause = Self::new(dyn_type_name(error), error.to_string());
        cause.code = error
            .downcast_ref::<std::io::Error>()
            .and_then(std::io::Error::raw_os_error)
            .map(i64::from);
        cause.inner = error
            .source()
            .map(|source| Box::new(Self::from_dyn_error(source)));
        cause
    }

    /// Capture the payload of a caught panic.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::new("panic", panic_message(payload))
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn with_inner(mut self, inner: FaultCause) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// This cause followed by every inner cause.
    pub fn chain(&self) -> impl Iterator<Item = &FaultCause> {
        std::iter::successors(Some(self), |cause| cause.inner.as_deref())
    }
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn captured_backtrace() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

fn dyn_type_name(error: &(dyn Error + 'static)) -> String {
    if error.is::<std::io::Error>() {
        return "std::io::Error".to_owned();
    }
    // Debug output of derived errors starts with the type or variant name.
    let rendered = format!("{error:?}");
    let name: String = rendered
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "error".to_owned()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "config load failed")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn level_parses_names_and_codes() {
        assert_eq!("serious".parse::<FaultLevel>(), Ok(FaultLevel::Serious));
        assert_eq!("Double".parse::<FaultLevel>(), Ok(FaultLevel::Double));
        assert_eq!("u".parse::<FaultLevel>(), Ok(FaultLevel::Unrecoverable));
        assert_eq!("C".parse::<FaultLevel>(), Ok(FaultLevel::Continuable));
        assert!("X".parse::<FaultLevel>().is_err());
    }

    #[test]
    fn raw_level_keeps_unknown_input() {
        assert_eq!(RawFaultLevel::parse("f"), RawFaultLevel::Known(FaultLevel::Fatal));
        let raw = RawFaultLevel::parse("catastrophic");
        assert_eq!(raw.known(), None);
        assert_eq!(raw.to_string(), "unknown(catastrophic)");
    }

    #[test]
    fn only_double_and_unrecoverable_force_reboot() {
        let forced: Vec<_> = FaultLevel::ALL
            .into_iter()
            .filter(|level| level.forces_reboot())
            .collect();
        assert_eq!(forced, vec![FaultLevel::Double, FaultLevel::Unrecoverable]);
    }

    #[test]
    fn double_report_uses_capped_delay() {
        let report = FaultReport::double("escalated");
        assert_eq!(report.level, RawFaultLevel::Known(FaultLevel::Double));
        assert!(report.reboot_requested);
        assert_eq!(report.reboot_delay_secs, SEVERE_REBOOT_DELAY_LIMIT_SECS);
    }

    #[test]
    fn cause_walks_source_chain() {
        let error = Outer(std::io::Error::from_raw_os_error(2));
        let cause = FaultCause::from_error(&error);

        assert!(cause.type_name.ends_with("Outer"));
        assert_eq!(cause.message, "config load failed");
        assert!(cause.origin.as_deref().is_some_and(|o| o.contains("fault.rs")));

        let chain: Vec<_> = cause.chain().collect();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].type_name, "std::io::Error");
        assert_eq!(chain[1].code, Some(2));
    }

    #[test]
    fn panic_payloads_become_causes() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        let cause = FaultCause::from_panic(payload.as_ref());
        assert_eq!(cause.type_name, "panic");
        assert_eq!(cause.message, "index out of bounds");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");
    }
}
