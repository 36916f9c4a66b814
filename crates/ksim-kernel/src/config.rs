use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ksim_power::DEFAULT_RPC_PORT;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub root: PathBuf,
    /// Defaults to `<root>/dumps`.
    pub dump_dir: Option<PathBuf>,
    pub write_dumps: bool,
    /// Print the cause chain and trace before asking for acknowledgement.
    pub show_stack_trace: bool,
    /// Unbounded when absent.
    pub event_log_capacity: Option<usize>,
    pub rpc_port: u16,
}

impl KernelConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading kernel config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing kernel config {}", path.display()))
    }

    pub fn resolved_dump_dir(&self) -> PathBuf {
        self.dump_dir
            .clone()
            .unwrap_or_else(|| self.root.join("dumps"))
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".ksim"),
            dump_dir: None,
            write_dumps: true,
            show_stack_trace: false,
            event_log_capacity: None,
            rpc_port: DEFAULT_RPC_PORT,
        }
    }
}
