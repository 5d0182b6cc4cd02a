//! mdmctl: drive the modem client facade from the command line.

mod config;
mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mdm_cli::{
    AckMode, DebugInfo, DebugType, EventKind, InstanceId, ModemMonitor, MonitorOptions,
    RestartCause, RetryPolicy,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mdmctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Modem configuration file (defaults to $MDMCLI_CONFIG, then /etc/mdmcli/modems.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Action {
    Acquire,
    Release,
    Restart,
    Update,
    Shutdown,
    NvmBackup,
    NotifyDebug,
}

impl Action {
    fn name(self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::Restart => "restart",
            Self::Update => "update",
            Self::Shutdown => "shutdown",
            Self::NvmBackup => "nvm-backup",
            Self::NotifyDebug => "notify-debug",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show which backend serves an instance
    Resolve {
        /// Modem instance (1-based)
        #[arg(short, long, default_value = "1")]
        instance: i64,
    },

    /// Connect and perform one operation
    Run {
        /// Operation to perform
        action: Action,

        /// Client name sent to the backend
        #[arg(short, long, default_value = "mdmctl")]
        name: String,

        /// Modem instance (1-based)
        #[arg(short, long, default_value = "1")]
        instance: i64,

        /// Debug causes for restart and notify-debug (at most 6 are kept)
        #[arg(long = "cause")]
        causes: Vec<String>,

        /// Debug record type for notify-debug, by number
        #[arg(long, default_value = "2", value_parser = parse_debug_type)]
        debug_type: DebugType,

        /// AP logs to attach, in MB (-1 for the service default)
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        ap_logs: i32,

        /// BP logs to attach, in MB (-1 for the service default)
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        bp_logs: i32,

        /// BP log depth, in seconds (-1 for the service default)
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        bp_time: i32,
    },

    /// Connect and print events until a timeout
    Monitor {
        /// Client name sent to the backend
        #[arg(short, long, default_value = "mdmctl")]
        name: String,

        /// Modem instance (1-based)
        #[arg(short, long, default_value = "1")]
        instance: i64,

        /// Events to subscribe to (default: all)
        #[arg(short, long = "event", value_parser = parse_event)]
        events: Vec<EventKind>,

        /// Stop after this many seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Stop once the modem reports this status
        #[arg(long, value_parser = parse_event)]
        until: Option<EventKind>,

        /// Acknowledge cold reset and shutdown after printing them
        #[arg(long)]
        deferred: bool,

        /// Connect attempts
        #[arg(long, default_value = "1")]
        retries: u32,
    },
}

fn parse_event(s: &str) -> Result<EventKind, String> {
    EventKind::ALL
        .into_iter()
        .find(|kind| kind.name().eq_ignore_ascii_case(&s.replace('-', "_")))
        .ok_or_else(|| format!("unknown event '{s}'"))
}

fn parse_debug_type(s: &str) -> Result<DebugType, String> {
    s.parse::<i32>()
        .ok()
        .and_then(DebugType::from_raw)
        .ok_or_else(|| format!("unknown debug type '{s}'"))
}

fn instance_id(raw: i64) -> Result<InstanceId> {
    InstanceId::new(raw).with_context(|| format!("Invalid instance {raw}: must be in 1..={}", i32::MAX))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let source = config::source(cli.config.as_deref());

    match cli.command {
        Commands::Resolve { instance } => {
            resolve(source, instance_id(instance)?, cli.format)?;
        }
        Commands::Run {
            action,
            name,
            instance,
            causes,
            debug_type,
            ap_logs,
            bp_logs,
            bp_time,
        } => {
            let logs = (ap_logs, bp_logs, bp_time);
            run(source, &name, instance, action, &causes, debug_type, logs, cli.format)?;
        }
        Commands::Monitor {
            name,
            instance,
            events,
            timeout,
            until,
            deferred,
            retries,
        } => {
            let options = MonitorOptions {
                instance: instance_id(instance)?,
                events: if events.is_empty() {
                    EventKind::ALL.to_vec()
                } else {
                    events
                },
                retry: RetryPolicy::new(retries, Duration::from_secs(1)),
                ack_mode: if deferred {
                    AckMode::Deferred
                } else {
                    AckMode::Immediate
                },
            };
            monitor(source, &name, &options, Duration::from_secs(timeout), until, cli.format)?;
        }
    }

    Ok(())
}

fn resolve(source: mdm_config::FileSource, instance: InstanceId, format: OutputFormat) -> Result<()> {
    let topology = match config::load_topology(&source) {
        Ok(topology) => Some(topology),
        Err(e) => {
            tracing::warn!("{:#}", e);
            None
        }
    };
    let backend = config::connector(source).locator().resolve(instance);
    println!(
        "{}",
        output::format_resolution(instance, &backend, topology.as_ref(), format)?
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run(
    source: mdm_config::FileSource,
    name: &str,
    instance: i64,
    action: Action,
    causes: &[String],
    debug_type: DebugType,
    (ap_logs, bp_logs, bp_time): (i32, i32, i32),
    format: OutputFormat,
) -> Result<()> {
    let connector = config::connector(source);
    let mut client = connector
        .connect(name, instance_id(instance)?, Vec::new())
        .with_context(|| format!("Failed to connect '{name}' to instance {instance}"))?;
    tracing::info!("Connected to {}", client.backend_name());

    let result = match action {
        Action::Acquire => client.acquire(),
        Action::Release => client.release(),
        Action::Restart => {
            let info = DebugInfo::from_causes(DebugType::Apimr, causes.iter().cloned())?
                .with_logs(ap_logs, bp_logs, bp_time);
            client.restart(RestartCause::Error, Some(&info))
        }
        Action::Update => client.restart(RestartCause::ApplyUpdate, None),
        Action::Shutdown => client.shutdown(),
        Action::NvmBackup => client.nvm_backup(),
        Action::NotifyDebug => {
            let info = DebugInfo::from_causes(debug_type, causes.iter().cloned())?
                .with_logs(ap_logs, bp_logs, bp_time);
            client.notify_debug(Some(&info))
        }
    };

    println!("{}", output::format_outcome(action.name(), &result, format)?);
    client.disconnect().context("Failed to disconnect")?;

    if result.is_err() {
        bail!("{} failed", action.name());
    }
    Ok(())
}

fn monitor(
    source: mdm_config::FileSource,
    name: &str,
    options: &MonitorOptions,
    timeout: Duration,
    until: Option<EventKind>,
    format: OutputFormat,
) -> Result<()> {
    let connector = config::connector(source);
    let mut monitor = ModemMonitor::connect(&connector, name, options)
        .with_context(|| format!("Failed to connect '{name}' to instance {}", options.instance))?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(event) = monitor.recv_timeout(remaining) else {
            break;
        };
        println!("{}", output::format_event(&event, format)?);

        if monitor.pending_acks().contains(&event.kind) {
            monitor
                .acknowledge(event.kind)
                .with_context(|| format!("Failed to acknowledge {}", event.kind))?;
        }
        if until == Some(event.kind) {
            break;
        }
    }

    tracing::info!(status = ?monitor.status(), "Monitor finished");
    monitor.disconnect().context("Failed to disconnect")?;
    Ok(())
}
