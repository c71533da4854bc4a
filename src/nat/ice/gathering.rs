// src/nat/ice/gathering.rs
//! One candidate-gathering run against a transport
//!
//! A session moves `Idle -> Gathering -> Complete` exactly once. There is no
//! internal timeout: a transport that never delivers the end-of-candidates
//! marker keeps [`GatheringSession::run`] pending. Callers that need bounded
//! latency wrap it in a deadline and drop the session on expiry, which drops
//! the transport with it.

use std::fmt;
use std::time::{Duration, Instant};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::nat::classify::{classify, NatType};
use crate::nat::error::{NatError, NatResult};
use super::candidate::{parse_candidate, CandidateSignal};
use super::collector::CandidateCollector;
use super::transport::{
    CandidateNotification, IceGatheringState, IceServer, IceTransport, TransportFactory,
};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringPhase {
    /// Transport created, nothing requested yet
    Idle,
    /// Offer issued, consuming candidate notifications
    Gathering,
    /// End-of-candidates received; result frozen
    Complete,
}

/// What a session is run for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPurpose {
    /// Parse and collect candidates for NAT classification
    Classification,
    /// Only the completion event matters
    Timing,
}

/// Elapsed gathering time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GatheringTime(Duration);

impl GatheringTime {
    /// Wrap a measured duration
    pub fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    /// Unrounded duration
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Seconds rounded to two decimal places
    pub fn as_secs_f64_rounded(&self) -> f64 {
        (self.0.as_secs_f64() * 100.0).round() / 100.0
    }
}

impl fmt::Display for GatheringTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.as_secs_f64_rounded())
    }
}

impl Serialize for GatheringTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_secs_f64_rounded())
    }
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatheringStats {
    /// Candidate notifications received, terminal marker excluded
    pub notifications: usize,
    /// Candidates that parsed
    pub parsed: usize,
    /// Candidates dropped as malformed
    pub malformed: usize,
}

/// Frozen outcome of a completed session
#[derive(Debug, Clone)]
pub struct GatheringReport {
    /// Session that produced this report
    pub session_id: Uuid,
    /// Why the session ran
    pub purpose: SessionPurpose,
    /// Time from offer generation to end-of-candidates
    pub elapsed: GatheringTime,
    /// Collected srflx candidates; empty for timing sessions
    pub collection: CandidateCollector,
    /// Notification counters
    pub stats: GatheringStats,
    /// Transport state read when the terminal marker arrived
    pub final_state: IceGatheringState,
}

impl GatheringReport {
    /// Classify from the collected srflx candidates
    pub fn nat_type(&self) -> NatType {
        classify(&self.collection)
    }
}

/// One gathering run
pub struct GatheringSession {
    id: Uuid,
    purpose: SessionPurpose,
    phase: GatheringPhase,
    transport: Box<dyn IceTransport>,
    candidates: mpsc::UnboundedReceiver<CandidateNotification>,
    collector: CandidateCollector,
    stats: GatheringStats,
}

impl GatheringSession {
    /// Create the transport for `servers`. The session starts `Idle`.
    pub fn new(
        factory: &dyn TransportFactory,
        servers: &[IceServer],
        purpose: SessionPurpose,
    ) -> NatResult<Self> {
        let handle = factory.create(servers)?;
        let id = Uuid::new_v4();

        debug!("Created {:?} gathering session {} with {} server(s)", purpose, id, servers.len());

        Ok(Self {
            id,
            purpose,
            phase: GatheringPhase::Idle,
            transport: handle.transport,
            candidates: handle.candidates,
            collector: CandidateCollector::new(),
            stats: GatheringStats::default(),
        })
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> GatheringPhase {
        self.phase
    }

    /// Drive the session to completion.
    ///
    /// Fails with [`NatError::InvalidState`] if the session already ran, and
    /// with [`NatError::GatheringAborted`] if the notification stream closes
    /// before the terminal marker.
    pub async fn run(&mut self) -> NatResult<GatheringReport> {
        if self.phase != GatheringPhase::Idle {
            return Err(NatError::InvalidState(format!(
                "session {} already {:?}",
                self.id, self.phase
            )));
        }

        let span = info_span!("gathering", session = %self.id, purpose = ?self.purpose);
        self.gather().instrument(span).await
    }

    async fn gather(&mut self) -> NatResult<GatheringReport> {
        let started = Instant::now();
        self.phase = GatheringPhase::Gathering;
        self.transport.generate_offer().await?;
        debug!("Offer generated, waiting for candidates");

        loop {
            match self.candidates.recv().await {
                Some(Some(raw)) if !raw.trim().is_empty() => self.handle_candidate(&raw),
                Some(_) => break,
                None => {
                    warn!("Transport closed its candidate stream without end-of-candidates");
                    return Err(NatError::GatheringAborted);
                }
            }
        }

        let elapsed = GatheringTime::from_duration(started.elapsed());

        // The terminal marker wins if the transport disagrees
        let final_state = self.transport.gathering_state();
        if final_state != IceGatheringState::Complete {
            warn!(
                "End-of-candidates received while transport reports '{}'",
                final_state
            );
        }

        self.phase = GatheringPhase::Complete;

        info!(
            "Gathering complete in {}s: {} candidate(s), {} srflx port(s), {} malformed",
            elapsed,
            self.stats.notifications,
            self.collector.len(),
            self.stats.malformed
        );

        Ok(GatheringReport {
            session_id: self.id,
            purpose: self.purpose,
            elapsed,
            collection: std::mem::take(&mut self.collector),
            stats: self.stats,
            final_state,
        })
    }

    fn handle_candidate(&mut self, raw: &str) {
        self.stats.notifications += 1;

        if self.purpose == SessionPurpose::Timing {
            trace!("Candidate: {}", raw);
            return;
        }

        match parse_candidate(Some(raw)) {
            Ok(CandidateSignal::Candidate(candidate)) => {
                debug!("Candidate: {}", candidate);
                self.stats.parsed += 1;
                self.collector.observe(&candidate);
            }
            Ok(CandidateSignal::EndOfCandidates) => {}
            Err(e) => {
                debug!("Dropping candidate: {}", e);
                self.stats.malformed += 1;
            }
        }
    }
}

impl fmt::Debug for GatheringSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatheringSession")
            .field("id", &self.id)
            .field("purpose", &self.purpose)
            .field("phase", &self.phase)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use crate::nat::ice::transport::TransportHandle;

    /// Emits a fixed script on `generate_offer`
    struct ScriptTransport {
        tx: Option<mpsc::UnboundedSender<CandidateNotification>>,
        script: Vec<CandidateNotification>,
        state: Arc<Mutex<IceGatheringState>>,
        report_complete: bool,
    }

    impl IceTransport for ScriptTransport {
        fn generate_offer(&mut self) -> BoxFuture<'_, NatResult<()>> {
            Box::pin(async move {
                *self.state.lock() = IceGatheringState::Gathering;
                if let Some(tx) = self.tx.take() {
                    for item in self.script.drain(..) {
                        let end = item.is_none();
                        if end && self.report_complete {
                            *self.state.lock() = IceGatheringState::Complete;
                        }
                        let _ = tx.send(item);
                    }
                }
                Ok(())
            })
        }

        fn gathering_state(&self) -> IceGatheringState {
            *self.state.lock()
        }
    }

    struct ScriptFactory {
        script: Vec<CandidateNotification>,
        report_complete: bool,
    }

    impl ScriptFactory {
        fn new(lines: &[&str], terminate: bool) -> Self {
            let mut script: Vec<CandidateNotification> =
                lines.iter().map(|l| Some(l.to_string())).collect();
            if terminate {
                script.push(None);
            }
            Self { script, report_complete: true }
        }
    }

    impl TransportFactory for ScriptFactory {
        fn create(&self, _servers: &[IceServer]) -> NatResult<TransportHandle> {
            let (tx, rx) = mpsc::unbounded_channel();
            Ok(TransportHandle {
                transport: Box::new(ScriptTransport {
                    tx: Some(tx),
                    script: self.script.clone(),
                    state: Arc::new(Mutex::new(IceGatheringState::New)),
                    report_complete: self.report_complete,
                }),
                candidates: rx,
            })
        }
    }

    fn servers() -> Vec<IceServer> {
        vec![IceServer::new("stun:a.example"), IceServer::new("stun:b.example")]
    }

    #[tokio::test]
    async fn test_classification_session_collects_srflx() {
        let factory = ScriptFactory::new(
            &[
                "candidate:1 1 udp 2122260223 192.168.1.20 51000 typ host",
                "candidate:2 1 udp 1677729535 203.0.113.4 54321 typ srflx",
                "candidate:3 1 udp 1677729535 203.0.113.4 60010 typ srflx",
            ],
            true,
        );

        let mut session =
            GatheringSession::new(&factory, &servers(), SessionPurpose::Classification).unwrap();
        assert_eq!(session.phase(), GatheringPhase::Idle);

        let report = session.run().await.unwrap();
        assert_eq!(session.phase(), GatheringPhase::Complete);
        assert_eq!(report.stats.notifications, 3);
        assert_eq!(report.stats.parsed, 3);
        assert_eq!(report.collection.len(), 2);
        assert_eq!(report.nat_type(), NatType::Symmetric);
        assert_eq!(report.final_state, IceGatheringState::Complete);
    }

    #[tokio::test]
    async fn test_malformed_candidates_are_dropped() {
        let factory = ScriptFactory::new(
            &[
                "candidate:1 1 udp 1677729535 203.0.113.4 54321",
                "garbage",
                "candidate:2 1 udp 1677729535 203.0.113.4 54321 typ srflx",
            ],
            true,
        );

        let mut session =
            GatheringSession::new(&factory, &servers(), SessionPurpose::Classification).unwrap();
        let report = session.run().await.unwrap();

        assert_eq!(report.stats.malformed, 2);
        assert_eq!(report.collection.ports(), vec![54321]);
        assert_eq!(report.nat_type(), NatType::NonSymmetric);
    }

    #[tokio::test]
    async fn test_timing_session_ignores_content() {
        let factory = ScriptFactory::new(&["not a candidate", "also not"], true);

        let mut session =
            GatheringSession::new(&factory, &servers(), SessionPurpose::Timing).unwrap();
        let report = session.run().await.unwrap();

        assert_eq!(report.stats.notifications, 2);
        assert_eq!(report.stats.malformed, 0);
        assert!(report.collection.is_empty());
    }

    #[tokio::test]
    async fn test_empty_string_is_terminal() {
        let mut factory = ScriptFactory::new(&["candidate:1 1 udp 1 203.0.113.4 1 typ srflx"], false);
        factory.script.push(Some(String::new()));

        let mut session =
            GatheringSession::new(&factory, &servers(), SessionPurpose::Classification).unwrap();
        let report = session.run().await.unwrap();
        assert_eq!(report.collection.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_stream_aborts() {
        let factory = ScriptFactory::new(&["candidate:1 1 udp 1 203.0.113.4 1 typ srflx"], false);

        let mut session =
            GatheringSession::new(&factory, &servers(), SessionPurpose::Classification).unwrap();
        assert!(matches!(session.run().await, Err(NatError::GatheringAborted)));
    }

    #[tokio::test]
    async fn test_marker_wins_over_state() {
        let mut factory = ScriptFactory::new(&[], true);
        factory.report_complete = false;

        let mut session =
            GatheringSession::new(&factory, &servers(), SessionPurpose::Timing).unwrap();
        let report = session.run().await.unwrap();
        assert_eq!(session.phase(), GatheringPhase::Complete);
        assert_eq!(report.final_state, IceGatheringState::Gathering);
    }

    #[tokio::test]
    async fn test_session_runs_once() {
        let factory = ScriptFactory::new(&[], true);
        let mut session =
            GatheringSession::new(&factory, &servers(), SessionPurpose::Timing).unwrap();
        session.run().await.unwrap();
        assert!(matches!(session.run().await, Err(NatError::InvalidState(_))));
    }

    #[test]
    fn test_gathering_time_rounding() {
        let t = GatheringTime::from_duration(Duration::from_millis(1234));
        assert_eq!(t.as_secs_f64_rounded(), 1.23);
        assert_eq!(t.to_string(), "1.23");

        let t = GatheringTime::from_duration(Duration::from_millis(7));
        assert_eq!(t.to_string(), "0.01");
        assert_eq!(serde_json::to_string(&t).unwrap(), "0.01");
    }
}
