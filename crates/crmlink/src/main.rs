//! `crmlink` host binary: runs the scanner or links mail on demand.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crmlink::{init_logging, load_config, Config, CrmLinkService};

#[derive(Parser)]
#[command(
    name = "crmlink",
    version,
    about = "Links mail chains to the CRM contacts their participants belong to"
)]
struct Cli {
    /// Path to a YAML configuration file. Defaults apply when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic scanner until Ctrl-C.
    Run,

    /// Link one message now and print the JSON report.
    Link {
        #[arg(long)]
        tenant: i64,
        #[arg(long)]
        message: i64,
    },

    /// Re-examine recent unlinked mail for a tenant and print the JSON report.
    Recent {
        #[arg(long)]
        tenant: i64,
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
}

type CliResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    init_logging(&config.logging);

    let service = CrmLinkService::open(&config)?;

    match cli.command {
        Commands::Run => run_scanner(&service, &config),
        Commands::Link { tenant, message } => print_json(&service.process_message(tenant, message)),
        Commands::Recent { tenant, hours } => print_json(&service.process_recent(tenant, hours)),
    }
}

fn run_scanner(service: &CrmLinkService, config: &Config) -> CliResult<()> {
    if !config.scanner.enabled {
        tracing::warn!("Scanner is disabled in the configuration, nothing to run");
        return Ok(());
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    service.start()?;
    tracing::info!("Press Ctrl-C to stop");
    // A closed channel also ends the wait.
    let _ = rx.recv();

    tracing::info!("Shutting down, draining the current scan cycle");
    service.stop();
    let status = service.status();
    tracing::info!(
        cycles = status.cycles_completed,
        watermark = %status.watermark,
        "Scanner stopped"
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
