use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;

use nat_probe::{
    init_logging, with_deadline, IceServer, NatProbe, ProbeConfig, StunTransportFactory,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "NAT mapping and ICE gathering probe", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Give up after this many seconds (overrides the config)
    #[arg(long)]
    deadline: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify the local NAT as symmetric or non-symmetric
    NatType {
        /// STUN server URL; repeat for each server (at least two)
        #[arg(short, long = "server")]
        servers: Vec<String>,
    },

    /// Measure ICE candidate gathering time
    GatheringTime {
        /// STUN/TURN server URL; repeat for each server
        #[arg(short, long = "server", required = true)]
        servers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = match &args.config {
        Some(path) => ProbeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProbeConfig::default(),
    };
    if let Some(secs) = args.deadline {
        config.deadline_secs = Some(secs);
    }

    match args.command {
        Command::NatType { ref servers } => {
            if !servers.is_empty() {
                config.stun_servers = servers.iter().map(|url| IceServer::new(url.as_str())).collect();
            }
            run_nat_type(config, args.json).await
        }
        Command::GatheringTime { ref servers } => {
            let servers: Vec<IceServer> = servers.iter().map(|url| IceServer::new(url.as_str())).collect();
            run_gathering_time(config, &servers, args.json).await
        }
    }
}

fn probe(config: ProbeConfig) -> Result<NatProbe> {
    let factory = Arc::new(StunTransportFactory::new(config.stun.clone()));
    NatProbe::new(config, factory).context("invalid probe configuration")
}

async fn bounded<T>(
    deadline: Option<Duration>,
    fut: impl std::future::Future<Output = nat_probe::NatResult<T>>,
) -> nat_probe::NatResult<T> {
    match deadline {
        Some(deadline) => with_deadline(deadline, fut).await,
        None => fut.await,
    }
}

async fn run_nat_type(config: ProbeConfig, as_json: bool) -> Result<()> {
    let deadline = config.deadline();
    let probe = probe(config)?;

    let outcome = bounded(deadline, probe.classification())
        .await
        .context("NAT classification")?;

    if as_json {
        let report = json!({
            "measured_at": Utc::now(),
            "nat_type": outcome.nat_type,
            "srflx_ports": outcome.srflx_ports,
            "gathering_secs": outcome.elapsed,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("NAT type: {}", outcome.nat_type);
        println!("Server-reflexive ports: {:?}", outcome.srflx_ports);
        if outcome.srflx_ports.is_empty() {
            println!("No STUN server answered; the result is not meaningful.");
        } else if outcome.nat_type.needs_relay() {
            println!("Peer connections will likely need a TURN relay.");
        }
    }

    Ok(())
}

async fn run_gathering_time(config: ProbeConfig, servers: &[IceServer], as_json: bool) -> Result<()> {
    let deadline = config.deadline();
    let probe = probe(config)?;

    let took = bounded(deadline, probe.ice_gathering_time(servers))
        .await
        .context("ICE gathering")?;

    if as_json {
        let report = json!({
            "measured_at": Utc::now(),
            "servers": servers,
            "gathering_secs": took,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("ICE gathering time: {}s", took);
    }

    Ok(())
}
