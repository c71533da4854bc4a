//! NAT classification and ICE gathering measurement

pub mod classify;
pub mod config;
pub mod error;
pub mod ice;
pub mod session;
pub mod stun;

use std::sync::Arc;

pub use self::classify::{classify, NatType};
pub use self::config::{ProbeConfig, StunOptions};
pub use self::error::{NatError, NatResult};
pub use self::ice::{GatheringTime, IceServer, TransportFactory};
pub use self::session::{with_deadline, ClassificationOutcome, NatProbe};
pub use self::stun::StunTransportFactory;

impl NatProbe {
    /// Probe backed by the bundled STUN transport, classification started.
    /// Must be called from within a tokio runtime.
    pub fn with_stun(config: ProbeConfig) -> NatResult<Self> {
        let factory = Arc::new(StunTransportFactory::new(config.stun.clone()));
        Self::start(config, factory)
    }
}
