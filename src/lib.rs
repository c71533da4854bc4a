//! nat-probe
//!
//! Learns whether the local NAT maps per destination (symmetric) or not, and
//! measures how long ICE candidate gathering takes against a set of STUN
//! servers.
//!
//! ```no_run
//! # async fn demo() -> nat_probe::NatResult<()> {
//! use nat_probe::{IceServer, NatProbe, ProbeConfig};
//!
//! let probe = NatProbe::with_stun(ProbeConfig::default())?;
//! let nat_type = probe.nat_type().await?;
//! let took = probe
//!     .ice_gathering_time(&[IceServer::new("stun:stun.l.google.com:19302")])
//!     .await?;
//! println!("{} NAT, gathering took {}s", nat_type, took);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod nat;

pub use nat::{
    classify, with_deadline, ClassificationOutcome, GatheringTime, IceServer, NatError, NatProbe,
    NatResult, NatType, ProbeConfig, StunOptions, StunTransportFactory, TransportFactory,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Example
/// ```
/// nat_probe::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .try_init();
}
