//! fleetmendd — the FleetMend daemon.
//!
//! Single binary that assembles:
//! - Record store (redb)
//! - Compute and metrics gateway clients
//! - Health evaluator
//! - Remediation controller + periodic sweep
//! - REST API (operator actions, alarm and state-change delivery)
//!
//! # Usage
//!
//! ```text
//! fleetmendd run --config /etc/fleetmend/fleetmend.toml --port 8080
//! fleetmendd sweep --config /etc/fleetmend/fleetmend.toml
//! fleetmendd config --config /etc/fleetmend/fleetmend.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fleetmend_core::FleetConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,fleetmendd=debug,fleetmend=debug";

#[derive(Parser)]
#[command(name = "fleetmendd", about = "FleetMend auto-remediation daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sweep loop and the API server until interrupted.
    Run(ConfigArgs),
    /// Run a single sweep, print its report as JSON, and exit.
    Sweep(ConfigArgs),
    /// Print the effective configuration as TOML.
    Config(ConfigArgs),
}

/// Config file plus command-line overrides.
#[derive(Args, Debug, Default, Clone)]
struct ConfigArgs {
    /// Path to fleetmend.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// API listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the record store (`records.redb`).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Maximum instances pending restart on the automatic path.
    #[arg(long)]
    max_reboot_instance_num: Option<usize>,

    /// Sweep interval, e.g. "5m" or "90s".
    #[arg(long)]
    sweep_interval: Option<String>,
}

impl ConfigArgs {
    /// Load the config file (if any), apply overrides, and validate.
    fn resolve(&self) -> anyhow::Result<FleetConfig> {
        let mut config = match &self.config {
            Some(path) => FleetConfig::from_file(path)?,
            None => FleetConfig::default(),
        };

        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(dir) = &self.data_dir {
            config.store.path = dir.join("records.redb").to_string_lossy().into_owned();
        }
        if let Some(max) = self.max_reboot_instance_num {
            config.controller.max_reboot_instance_num = max;
        }
        if let Some(interval) = &self.sweep_interval {
            config.sweep.interval = interval.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run(args) => daemon::run(args.resolve()?).await,
        Command::Sweep(args) => {
            let report = daemon::sweep_once(args.resolve()?).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Config(args) => {
            print!("{}", args.resolve()?.to_toml_string()?);
            Ok(())
        }
    }
}
