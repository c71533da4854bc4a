// src/nat/ice/mod.rs
//! ICE candidate gathering
//!
//! - `candidate`: raw candidate line parsing and rendering
//! - `collector`: srflx candidates keyed by public port
//! - `transport`: the capability sessions consume
//! - `gathering`: the `Idle -> Gathering -> Complete` session

pub mod candidate;
pub mod collector;
pub mod gathering;
pub mod transport;

pub use candidate::{
    parse_candidate, Candidate, CandidateLine, CandidateSignal, CandidateType, TransportProtocol,
};
pub use collector::CandidateCollector;
pub use gathering::{
    GatheringPhase, GatheringReport, GatheringSession, GatheringStats, GatheringTime,
    SessionPurpose,
};
pub use transport::{
    validate_servers, CandidateNotification, IceGatheringState, IceServer, IceTransport,
    TransportFactory, TransportHandle,
};
