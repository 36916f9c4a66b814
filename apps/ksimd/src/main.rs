use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ksim_events::{FnExtension, StaticExtensionRegistry};
use ksim_kernel::{Kernel, KernelBuilder, KernelConfig};
use ksim_protocol::{EventKind, ExtensionError, FaultReport, RawFaultLevel};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ksimd")]
#[command(about = "ksim kernel core host")]
struct Cli {
    #[arg(long, default_value = ".ksim")]
    root: PathBuf,
    /// JSON kernel config; overrides --root when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignored when RUST_LOG is set.
    #[arg(long, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Boot, log in, raise a continuable fault, and print the fired events.
    Demo {
        #[arg(long, default_value = "")]
        filter: String,
    },
    /// Raise a single fault and report how it ended.
    Raise {
        /// Level name or code: continuable, serious, double, fatal, unrecoverable.
        #[arg(long)]
        level: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        reboot: bool,
        #[arg(long, default_value_t = 0)]
        delay: u64,
        /// Template variables for `{0}`, `{1}`, ...; parsed as JSON when possible.
        #[arg(long = "var")]
        variables: Vec<String>,
    },
    /// Ask another instance to change power state.
    Remote {
        #[arg(value_enum)]
        action: RemoteAction,
        target: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RemoteAction {
    Shutdown,
    Reboot,
    RebootSafe,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => KernelConfig::load(path)?,
        None => KernelConfig::new(&cli.root),
    };

    let registry = Arc::new(StaticExtensionRegistry::new());
    registry.register(Arc::new(FnExtension::new(
        "event-tracer",
        |event: &EventKind| -> Result<(), ExtensionError> {
            info!(event = event.name(), payload = ?event.payload(), "event.observed");
            Ok(())
        },
    )));

    let kernel = KernelBuilder::from_config(config)
        .registry(registry)
        .build();

    match cli.command {
        Command::Demo { filter } => demo(&kernel, &filter),
        Command::Raise {
            level,
            description,
            reboot,
            delay,
            variables,
        } => {
            let report = FaultReport::new(RawFaultLevel::parse(&level), description)
                .reboot(reboot)
                .delay_secs(delay)
                .variables(variables.iter().map(String::as_str).map(parse_variable).collect());
            let outcome = kernel.raise_fault(report);
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
        Command::Remote { action, target } => {
            let power = kernel.power();
            match action {
                RemoteAction::Shutdown => power.remote_shutdown(&target),
                RemoteAction::Reboot => power.remote_reboot(&target),
                RemoteAction::RebootSafe => power.remote_reboot_safe(&target),
            }
            .with_context(|| format!("remote request to {target} failed"))
        }
    }
}

fn demo(kernel: &Kernel, filter: &str) -> Result<()> {
    for event in [
        EventKind::StartKernel,
        EventKind::KernelStarted,
        EventKind::PreLogin,
        EventKind::PostLogin {
            username: "root".to_owned(),
        },
        EventKind::ShellInitialized,
    ] {
        kernel.publish(event)?;
    }

    let outcome = kernel.raise_fault(
        FaultReport::new(RawFaultLevel::parse("continuable"), "demo fault in {0}")
            .variable("ksimd"),
    );
    info!(?outcome, stats = ?kernel.escalation_stats(), "demo fault handled");

    let fired = kernel.fired_events(filter);
    println!("{}", serde_json::to_string_pretty(&fired)?);
    Ok(())
}

fn parse_variable(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}
