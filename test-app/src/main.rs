// qtpro-cli -- command-line client for exercising a Qt Pro sound-masking
// controller over the network.
//
// Usage:
//   qtpro-cli --address 172.16.10.141 get firmware_version
//   qtpro-cli --address 172.16.10.141 get masking_max --zone 1
//   qtpro-cli --address 172.16.10.141 --model QT600 set masking_level 14 --zone 4
//   qtpro-cli --address 172.16.10.141 all
//   qtpro-cli --address 172.16.10.141 all --zone 0
//   qtpro-cli --address 172.16.10.141 monitor --duration 60
//   qtpro-cli --address 172.16.10.141 reset
//   qtpro-cli list
//
// Logging goes to stderr; RUST_LOG overrides -v.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use qtpro::api;
use qtpro::models::{all_qtpro_models, model_by_name};
use qtpro::{Direction, ParsedResponse, QtPro, QtProBuilder, Scope};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// qtpro-cli -- read and write Qt Pro controller parameters.
#[derive(Parser)]
#[command(name = "qtpro-cli", version, about)]
struct Cli {
    /// Controller host name or IP address.
    /// Required for all commands except `list`.
    #[arg(long)]
    address: Option<String>,

    /// Controller model: QT300 (3 zones) or QT600 (6 zones).
    #[arg(long, default_value = "QT300")]
    model: String,

    /// Telnet port.
    #[arg(long, default_value_t = 23)]
    port: u16,

    /// Seconds to wait for the connection to become ready.
    #[arg(long, default_value_t = 15)]
    wait: u64,

    /// Keep reconnecting after the connection drops (only useful with
    /// `monitor`).
    #[arg(long)]
    reconnect: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read one parameter. With --zone, reads a zone parameter.
    Get {
        /// Parameter name (see `list`).
        param: String,

        /// Zone index (0-based).
        #[arg(long)]
        zone: Option<u8>,
    },

    /// Write one parameter. With --zone, writes a zone parameter.
    Set {
        /// Parameter name (see `list`).
        param: String,

        /// New value.
        value: String,

        /// Zone index (0-based).
        #[arg(long)]
        zone: Option<u8>,
    },

    /// Read every system parameter, or every parameter of one zone.
    All {
        /// Zone index (0-based).
        #[arg(long)]
        zone: Option<u8>,
    },

    /// Reset the controller.
    Reset,

    /// Print connection events in real time.
    Monitor {
        /// Duration in seconds (0 = run until the event channel closes).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// List supported models and parameter names.
    List,
}

fn scope_for(zone: Option<u8>) -> Scope {
    if zone.is_some() {
        Scope::Zone
    } else {
        Scope::System
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list() -> Result<()> {
    println!("{:<8}  {:<12}  Zones", "Model", "Name");
    println!("{}", "-".repeat(30));
    for model in all_qtpro_models() {
        println!(
            "{:<8}  {:<12}  {}",
            model.model_id, model.name, model.num_zones
        );
    }

    for scope in [Scope::System, Scope::Zone] {
        println!();
        println!("{scope} parameters:");
        let get = api::table(scope, Direction::Get);
        let set = api::table(scope, Direction::Set);
        let width = get.names().map(str::len).max().unwrap_or(12);
        for (name, mnemonic) in get.entries() {
            let access = if set.contains(name) { "rw" } else { "r" };
            println!("  {name:<width$}  {mnemonic}  {access}");
        }
    }
    Ok(())
}

fn print_parsed(parsed: &ParsedResponse) {
    if parsed.is_empty() {
        println!("(no known fields in reply)");
        return;
    }
    let width = parsed.keys().map(String::len).max().unwrap_or(0);
    for (name, value) in parsed {
        println!("{name:<width$}  {value}");
    }
}

async fn cmd_get(qt: &QtPro, param: &str, zone: Option<u8>) -> Result<()> {
    let parsed = qt
        .get_parameter(scope_for(zone), param, zone)
        .await
        .with_context(|| format!("reading {param}"))?;
    print_parsed(&parsed);
    Ok(())
}

async fn cmd_set(qt: &QtPro, param: &str, value: &str, zone: Option<u8>) -> Result<()> {
    let confirmed = qt
        .set_parameter(scope_for(zone), param, value, zone)
        .await
        .with_context(|| format!("writing {param}"))?;
    if !confirmed {
        bail!("controller did not confirm {param}={value}");
    }
    println!("{param} = {value}");
    Ok(())
}

async fn cmd_all(qt: &QtPro, zone: Option<u8>) -> Result<()> {
    let parsed = qt
        .get_all_parameters(scope_for(zone), zone)
        .await
        .context("reading all parameters")?;
    print_parsed(&parsed);
    Ok(())
}

async fn cmd_reset(qt: &QtPro) -> Result<()> {
    if !qt.reset().await.context("sending reset")? {
        bail!("controller did not acknowledge the reset");
    }
    println!("Reset acknowledged.");
    Ok(())
}

async fn cmd_monitor(qt: &QtPro, duration_secs: u64) -> Result<()> {
    let mut event_rx = qt.subscribe();

    println!("Monitoring {} ({})...", qt.address(), qt.state());

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        match tokio::time::timeout(timeout, event_rx.recv()).await {
            Ok(Ok(event)) => println!("[event] {event:?}"),
            Ok(Err(RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                    break;
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn connect(cli: &Cli) -> Result<QtPro> {
    let Some(address) = cli.address.as_deref() else {
        bail!("--address is required for this command");
    };
    let Some(model) = model_by_name(&cli.model) else {
        bail!("unknown model '{}'. Supported: QT300, QT600", cli.model);
    };

    let qt = QtProBuilder::new(model)
        .address(address)
        .port(cli.port)
        .reconnect(cli.reconnect)
        .build()
        .await?;

    // Monitor reports connection progress itself.
    if !matches!(cli.command, Command::Monitor { .. }) {
        qt.wait_ready(Duration::from_secs(cli.wait))
            .await
            .with_context(|| format!("connecting to {}", qt.address()))?;
    }
    Ok(qt)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // The `list` command does not require a connection.
    if matches!(cli.command, Command::List) {
        return cmd_list();
    }

    let qt = connect(&cli).await?;

    let result = match &cli.command {
        Command::Get { param, zone } => cmd_get(&qt, param, *zone).await,
        Command::Set { param, value, zone } => cmd_set(&qt, param, value, *zone).await,
        Command::All { zone } => cmd_all(&qt, *zone).await,
        Command::Reset => cmd_reset(&qt).await,
        Command::Monitor { duration } => cmd_monitor(&qt, *duration).await,
        Command::List => cmd_list(),
    };

    qt.close().await;
    result
}
