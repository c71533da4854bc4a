// src/nat/session.rs
//! Process-scoped probe context
//!
//! [`NatProbe`] owns the single classification session and starts independent
//! timing sessions on request. The classification result is broadcast once to
//! every waiter through a watch channel.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::classify::NatType;
use super::config::ProbeConfig;
use super::error::{NatError, NatResult};
use super::ice::gathering::{GatheringSession, GatheringTime, SessionPurpose};
use super::ice::transport::{validate_servers, IceServer, TransportFactory};

/// Memoized result of the classification session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationOutcome {
    /// Classification result
    pub nat_type: NatType,
    /// Distinct public ports observed, sorted
    pub srflx_ports: Vec<u16>,
    /// How long the classification session gathered
    pub elapsed: GatheringTime,
}

#[derive(Debug, Clone)]
enum ClassificationState {
    Pending,
    Resolved(ClassificationOutcome),
    Failed(String),
}

/// Entry point for NAT classification and gathering-time measurement
pub struct NatProbe {
    config: ProbeConfig,
    factory: Arc<dyn TransportFactory>,
    classification: Mutex<Option<watch::Receiver<ClassificationState>>>,
}

impl NatProbe {
    /// Build the context without starting anything.
    ///
    /// Rejects configurations with fewer than two STUN servers, which cannot
    /// distinguish cone from symmetric mappings.
    pub fn new(config: ProbeConfig, factory: Arc<dyn TransportFactory>) -> NatResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            factory,
            classification: Mutex::new(None),
        })
    }

    /// Build the context and start classification immediately.
    /// Must be called from within a tokio runtime.
    pub fn start(config: ProbeConfig, factory: Arc<dyn TransportFactory>) -> NatResult<Self> {
        let probe = Self::new(config, factory)?;
        probe.initialize_classification();
        Ok(probe)
    }

    /// The validated configuration
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Start the classification session unless one is already gathering or
    /// complete. Returns whether a session was started.
    pub fn initialize_classification(&self) -> bool {
        let mut slot = self.classification.lock();
        if slot.is_some() {
            debug!("Classification session already started");
            return false;
        }

        let (tx, rx) = watch::channel(ClassificationState::Pending);
        *slot = Some(rx);
        drop(slot);

        let factory = Arc::clone(&self.factory);
        let servers = self.config.stun_servers.clone();

        tokio::spawn(async move {
            let state = match run_classification(factory.as_ref(), &servers).await {
                Ok(outcome) => ClassificationState::Resolved(outcome),
                Err(e) => {
                    warn!("NAT classification failed: {}", e);
                    ClassificationState::Failed(e.to_string())
                }
            };
            // Receivers may all be gone if the probe was dropped
            let _ = tx.send(state);
        });

        true
    }

    /// Wait for the classification session and return its full outcome
    pub async fn classification(&self) -> NatResult<ClassificationOutcome> {
        self.initialize_classification();

        let mut rx = self
            .classification
            .lock()
            .clone()
            .ok_or_else(|| NatError::InvalidState("classification not initialized".to_string()))?;

        let state = {
            let current = rx
                .wait_for(|s| !matches!(s, ClassificationState::Pending))
                .await
                .map_err(|_| {
                    NatError::Classification(
                        "classification session ended without a result".to_string(),
                    )
                })?;
            ClassificationState::clone(&current)
        };

        match state {
            ClassificationState::Resolved(outcome) => Ok(outcome),
            ClassificationState::Failed(reason) => Err(NatError::Classification(reason)),
            ClassificationState::Pending => Err(NatError::InvalidState(
                "classification still pending".to_string(),
            )),
        }
    }

    /// NAT type from the shared classification session. Every caller
    /// observes the same value.
    pub async fn nat_type(&self) -> NatResult<NatType> {
        Ok(self.classification().await?.nat_type)
    }

    /// Measure candidate gathering time against `servers` in a fresh,
    /// independent session.
    ///
    /// Fails with [`NatError::InvalidArgument`] before creating any transport
    /// if the list is empty or an entry has no `urls`.
    pub async fn ice_gathering_time(&self, servers: &[IceServer]) -> NatResult<GatheringTime> {
        validate_servers(servers)?;

        let mut session =
            GatheringSession::new(self.factory.as_ref(), servers, SessionPurpose::Timing)?;
        let report = session.run().await?;

        info!("ICE gathering took {}s", report.elapsed);
        Ok(report.elapsed)
    }
}

impl fmt::Debug for NatProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatProbe")
            .field("config", &self.config)
            .field("classification_started", &self.classification.lock().is_some())
            .finish_non_exhaustive()
    }
}

async fn run_classification(
    factory: &dyn TransportFactory,
    servers: &[IceServer],
) -> NatResult<ClassificationOutcome> {
    let mut session = GatheringSession::new(factory, servers, SessionPurpose::Classification)?;
    let report = session.run().await?;

    if report.collection.is_empty() {
        warn!("No server-reflexive candidates observed; classification defaults to non-symmetric");
    }

    let outcome = ClassificationOutcome {
        nat_type: report.nat_type(),
        srflx_ports: report.collection.ports(),
        elapsed: report.elapsed,
    };

    info!("NAT classified as {} (srflx ports {:?})", outcome.nat_type, outcome.srflx_ports);
    Ok(outcome)
}

/// Bound a probe future by `deadline`.
///
/// Nothing inside the probe times out on its own. On expiry the future is
/// dropped, and with it any timing session's transport. The shared
/// classification session keeps running for other waiters.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> NatResult<T>
where
    F: Future<Output = NatResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Probe did not finish within {:?}", deadline);
            Err(NatError::Timeout(deadline))
        }
    }
}
