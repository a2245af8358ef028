//! Binary entrypoint for the UGate host CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml`
//! - `ports` - list serial ports
//! - `probe [--port <path>] [-b <baud>] [--remote <addr>]` - check the radio link
//! - `send <command> --to <addr>... [--data <byte>,...]` - send one command batch
//! - `sync [--node <addr>]` - push host settings to one or all nodes
//! - `listen [--json]` - stay connected and print every event
//!
//! See the library crate docs for module-level details: `ugate::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;

use ugate::config::Config;
use ugate::events::Event;
use ugate::metrics;
use ugate::service::WirelessService;
use ugate::wireless::address::NodeAddress;
use ugate::wireless::command::Command;
use ugate::wireless::transport::{available_ports, HostParams, SerialConnector};

#[derive(Parser)]
#[command(name = "ugate")]
#[command(about = "Host controller for UGate remote gate and sensor nodes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config.toml
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Raise log verbosity: -v debug, -vv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// List serial ports visible on this machine
    Ports,
    /// Connect and query the radio address (local, or a remote node)
    Probe {
        /// Serial port of the local radio (overrides config)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate (overrides config)
        #[arg(short = 'b', long)]
        baud: Option<u32>,
        /// Also query this remote node
        #[arg(short, long)]
        remote: Option<String>,
    },
    /// Send one command to one or more nodes
    Send {
        /// Command name (e.g. SENSOR_GET_READINGS, get-readings) or numeric id
        command: Command,
        /// Target node addresses (4 hex digits)
        #[arg(short, long = "to", required = true, num_args = 1..)]
        to: Vec<String>,
        /// Payload bytes following the header, comma separated
        #[arg(short, long, value_delimiter = ',')]
        data: Vec<u8>,
    },
    /// Push host settings to one node, or every configured node
    Sync {
        #[arg(short, long)]
        node: Option<String>,
    },
    /// Stay connected and print events until Ctrl-C
    Listen {
        /// One JSON object per event
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config, everything else reads it
    let pre_config = match cli.command {
        Commands::Init | Commands::Ports => None,
        _ => Some(Config::load(&cli.config).await?),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            if std::path::Path::new(&cli.config).exists() {
                return Err(anyhow!("{} already exists, not overwriting", cli.config));
            }
            Config::create_default(&cli.config).await?;
            println!("Wrote default configuration to {}", cli.config);
        }
        Commands::Ports => {
            let ports = available_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{port}");
            }
        }
        Commands::Probe { port, baud, remote } => {
            let mut config = require(pre_config)?;
            config.wireless.sync_on_connect = false;
            let service = build_service(&config)?;
            let params = HostParams::new(
                port.unwrap_or_else(|| config.host.port.clone()),
                baud.unwrap_or(config.host.baud_rate),
            );
            service.connect_with(params).await?;
            let local = service.probe(None).await;
            match &local {
                Ok(addr) => println!("Local radio address: {addr}"),
                Err(e) => println!("Local radio did not answer: {e}"),
            }
            let mut remote_ok = true;
            if let Some(remote) = remote {
                let target = NodeAddress::parse(&remote)?;
                match service.probe(Some(&target)).await {
                    Ok(addr) => println!("Remote node {target} answered as {addr}"),
                    Err(e) => {
                        remote_ok = false;
                        println!("Remote node {target} did not answer: {e}");
                    }
                }
            }
            service.disconnect().await?;
            if local.is_err() || !remote_ok {
                std::process::exit(1);
            }
        }
        Commands::Send { command, to, data } => {
            let mut config = require(pre_config)?;
            config.wireless.sync_on_connect = false;
            let service = build_service(&config)?;
            service.bus.subscribe(print_event);
            service.connect().await?;
            let delivered = service.send(command, &data, to.as_slice()).await;
            service.disconnect().await?;
            report_metrics();
            if !delivered? {
                std::process::exit(1);
            }
        }
        Commands::Sync { node } => {
            let mut config = require(pre_config)?;
            config.wireless.sync_on_connect = false;
            let service = build_service(&config)?;
            service.bus.subscribe(print_event);
            service.connect().await?;
            let target = node.as_deref().map(NodeAddress::parse).transpose()?;
            let synced = service.push_settings(target.as_ref()).await;
            service.disconnect().await?;
            report_metrics();
            if !synced? {
                std::process::exit(1);
            }
        }
        Commands::Listen { json } => {
            let config = require(pre_config)?;
            let service = build_service(&config)?;
            if json {
                service.bus.subscribe(print_event_json);
            } else {
                service.bus.subscribe(print_event);
            }
            service.connect().await?;
            info!("Listening; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            if let Err(e) = service.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
            report_metrics();
        }
    }

    Ok(())
}

fn require(config: Option<Config>) -> Result<Config> {
    config.ok_or_else(|| anyhow!("configuration not loaded"))
}

fn build_service(config: &Config) -> Result<WirelessService> {
    Ok(WirelessService::new(
        config,
        Arc::new(SerialConnector),
        tokio::runtime::Handle::current(),
    )?)
}

fn print_event(event: &Event) {
    let addresses: Vec<&str> = event.addresses.iter().map(|a| a.as_str()).collect();
    let mut line = format!(
        "{} {:<24} [{}]",
        event.created.format("%H:%M:%S%.3f"),
        event.kind.name(),
        addresses.join(",")
    );
    if let Some(command) = event.command {
        line.push_str(&format!(" {}", command.name()));
    }
    if let (Some(key), Some(old), Some(new)) = (event.key, event.old_value, event.new_value) {
        line.push_str(&format!(" {key}: {old} -> {new}"));
    }
    for message in &event.messages {
        line.push_str(&format!(" - {}", ugate::logutil::escape_log(message)));
    }
    println!("{line}");
}

fn print_event_json(event: &Event) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("Could not render {} as JSON: {}", event.kind.name(), e),
    }
}

fn report_metrics() {
    let snap = metrics::snapshot();
    info!(
        "tx sent={} acked={} nacked={} timeouts={} faults={} avg_ack_ms={:?}",
        snap.tx_sent,
        snap.tx_acked,
        snap.tx_nacked,
        snap.tx_timeouts,
        snap.tx_faults,
        snap.ack_latency_avg_ms
    );
    let mut nodes: Vec<_> = metrics::node_counters_snapshot().into_iter().collect();
    nodes.sort_by(|a, b| a.0.cmp(&b.0));
    for (address, c) in nodes {
        info!(
            "node {} sent={} acked={} failed={} consecutive_failures={}",
            address, c.sent, c.acked, c.failed, c.consecutive_failures
        );
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.clone())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when someone is watching
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
