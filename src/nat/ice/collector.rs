// src/nat/ice/collector.rs
//! Server-reflexive candidate collection, keyed by public port

use std::collections::HashMap;
use tracing::trace;

use super::candidate::Candidate;

/// Server-reflexive candidates observed during one gathering session.
///
/// Distinctness is keyed solely on the public port: two STUN servers that
/// report the same mapped port collapse into one entry.
#[derive(Debug, Clone, Default)]
pub struct CandidateCollector {
    by_port: HashMap<u16, Candidate>,
}

impl CandidateCollector {
    /// Empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a candidate. Non-srflx candidates are ignored; a later srflx
    /// candidate on an already-seen port replaces the earlier one.
    pub fn observe(&mut self, candidate: &Candidate) {
        if !candidate.is_server_reflexive() {
            return;
        }

        if let Some(previous) = self.by_port.insert(candidate.port, candidate.clone()) {
            trace!("srflx port {} seen again (was {})", candidate.port, previous.address);
        }
    }

    /// Read-only view of the collection
    pub fn snapshot(&self) -> &HashMap<u16, Candidate> {
        &self.by_port
    }

    /// Number of distinct public ports observed
    pub fn len(&self) -> usize {
        self.by_port.len()
    }

    /// No srflx candidate seen yet
    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }

    /// Distinct public ports, sorted
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.by_port.keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}
