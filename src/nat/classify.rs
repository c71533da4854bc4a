// src/nat/classify.rs
//! Binary NAT classification from server-reflexive observations
//!
//! A symmetric NAT allocates a fresh public port per destination, so querying
//! two independent STUN servers from one socket yields two distinct srflx
//! ports. A cone NAT reuses its mapping and both servers report the same
//! port. This only works when the session queried at least two servers.

use std::fmt;
use serde::{Deserialize, Serialize};

use super::ice::collector::CandidateCollector;

/// NAT mapping behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NatType {
    /// Same public mapping regardless of destination (full or restricted cone),
    /// or nothing observed
    NonSymmetric,
    /// Different public mapping per destination
    Symmetric,
}

impl NatType {
    /// Kebab-case name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonSymmetric => "non-symmetric",
            Self::Symmetric => "symmetric",
        }
    }

    /// Peer connectivity behind this NAT generally needs a relay
    pub fn needs_relay(&self) -> bool {
        matches!(self, Self::Symmetric)
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Symmetric` iff more than one distinct srflx port was observed.
///
/// An empty collection classifies as `NonSymmetric`.
pub fn classify(collection: &CandidateCollector) -> NatType {
    if collection.len() > 1 {
        NatType::Symmetric
    } else {
        NatType::NonSymmetric
    }
}
