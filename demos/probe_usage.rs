// demos/probe_usage.rs
//! Classify the local NAT and time gathering against public STUN servers.
//!
//! Run with `cargo run --example probe_usage`.

use std::time::Duration;
use tracing::{info, warn};

use nat_probe::{with_deadline, IceServer, NatProbe, NatResult, ProbeConfig};

#[tokio::main]
async fn main() -> NatResult<()> {
    nat_probe::init_logging("info");

    // Classification starts here, in the background
    let probe = NatProbe::with_stun(ProbeConfig::default())?;

    let single = [IceServer::new("stun:stun.l.google.com:19302")];
    let pair = [
        IceServer::new("stun:stun.l.google.com:19302"),
        IceServer::new("stun:stun.cloudflare.com:3478"),
    ];

    // Independent timing sessions run alongside the classification
    let (one, two) = tokio::join!(
        with_deadline(Duration::from_secs(20), probe.ice_gathering_time(&single)),
        with_deadline(Duration::from_secs(20), probe.ice_gathering_time(&pair)),
    );
    match (one, two) {
        (Ok(one), Ok(two)) => info!("Gathering: {}s with one server, {}s with two", one, two),
        (one, two) => warn!("Timing failed: {:?} / {:?}", one.err(), two.err()),
    }

    let outcome = with_deadline(Duration::from_secs(30), probe.classification()).await?;
    info!(
        "NAT is {} (srflx ports {:?}), relay needed: {}",
        outcome.nat_type,
        outcome.srflx_ports,
        outcome.nat_type.needs_relay()
    );

    Ok(())
}
