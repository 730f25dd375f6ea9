//! CLI entry point: parses arguments, loads configuration, and runs the server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use modbus_tcpd::config::{ConfigOverrides, ServerConfig};
use modbus_tcpd::server::ModbusTcpServer;

/// A Modbus/TCP server.
#[derive(Debug, Parser)]
#[command(name = "modbus-tcpd", version, about)]
struct Cli {
    /// Path to a TOML config file; CLI flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    host: Option<String>,

    /// TCP port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Unit identifier echoed in responses.
    #[arg(long = "unit-id")]
    unit_id: Option<u8>,

    /// Bind an IPv6 socket instead of IPv4.
    #[arg(long)]
    ipv6: bool,

    /// Increase log verbosity; repeat for more (overridden by `RUST_LOG` if set).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log verbosity; repeat for less.
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let overrides = ConfigOverrides {
        host: cli.host.clone(),
        port: cli.port,
        unit_id: cli.unit_id,
        ipv6: if cli.ipv6 { Some(true) } else { None },
    };
    let config = ServerConfig::load(cli.config.as_deref(), overrides)
        .context("failed to load server configuration")?;

    let mut server = ModbusTcpServer::new(config);
    server.start().context("failed to start modbus/tcp server")?;
    Ok(())
}

fn init_tracing(verbose: u8, quiet: u8) {
    let default_level = match i16::from(verbose) - i16::from(quiet) {
        ..=-1 => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("modbus_tcpd={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
