//! ECU Diagnostics CLI - Main Entry Point

use anyhow::{Context, Result};
use can_slcan::candidate_ports;
use clap::{Parser, Subcommand};
use ecu_cli::config::AppConfig;
use ecu_cli::{init_logging, EcuContext};
use obd_protocol::ParameterDefinition;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "ecu-cli")]
#[command(author, version, about = "OBD-II diagnostics over SLCAN adapters")]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "ECUCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port to use instead of auto-discovery
    #[arg(short, long)]
    port: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports that look like CAN adapters
    Ports,

    /// Read the VIN and register the supported PIDs
    Init,

    /// Probe every PID of the given services
    Scan {
        /// Service id in hex (repeatable), e.g. --sid 01 --sid 09
        #[arg(long = "sid", value_parser = parse_hex_byte)]
        sids: Vec<u8>,
    },

    /// List stored parameter definitions
    Params {
        /// Only this vehicle
        #[arg(long)]
        vin: Option<String>,
    },
}

fn parse_hex_byte(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.port.is_some() {
        config.serial.port = cli.port.clone();
    }

    init_logging(&config.logging, cli.verbose);
    info!("=== ECU CLI v{} ===", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            on_ctrl_c.cancel();
        }
    });

    let ctx = EcuContext::new(config).context("Failed to open parameter store")?;

    match cli.command {
        Commands::Ports => {
            let ports = candidate_ports();
            if ports.is_empty() {
                println!("No candidate ports found");
            }
            for port in ports {
                println!("{}", port);
            }
        }

        Commands::Init => match ctx.initialize(&cancel).await? {
            Some(output) => {
                println!("Vehicle: {}", output.report.vehicle_id);
                if output.report.from_store {
                    println!("Loaded stored parameters");
                } else {
                    println!("Registered {} supported PIDs", output.report.registered);
                }
                print_parameters(&output.parameters);
            }
            None => println!("No SLCAN adapter found"),
        },

        Commands::Scan { sids } => {
            let sids = if sids.is_empty() { None } else { Some(sids) };
            let on_found = |r: &obd_scanner::ScanResult| {
                println!(
                    "[FOUND] SID:{:02X} PID:{:02X} DataLen:{}",
                    r.service_id,
                    r.parameter_id,
                    r.data_length()
                );
            };

            match ctx.scan(sids, on_found, &cancel).await? {
                Some(summary) => {
                    println!(
                        "Probed {} PIDs, found {}{}",
                        summary.probed,
                        summary.found,
                        if summary.cancelled { " (cancelled)" } else { "" }
                    );
                }
                None => println!("No SLCAN adapter found"),
            }
        }

        Commands::Params { vin } => {
            let parameters = ctx.parameters(vin.as_deref())?;
            if parameters.is_empty() {
                println!("No stored parameters");
            }
            print_parameters(&parameters);
        }
    }

    Ok(())
}

fn print_parameters(parameters: &[ParameterDefinition]) {
    for p in parameters {
        println!(
            "{:<6} {:<40} bytes={} formula={} unit={} vehicle={}",
            p.key, p.name, p.bytes_returned, p.formula, p.unit, p.vehicle_id
        );
    }
}
