// src/nat/stun/mod.rs
//! STUN-backed ICE transport
//!
//! Gathers host and server-reflexive candidates from one UDP socket. Every
//! configured STUN server is queried from that same socket, so a NAT that maps
//! per destination shows up as distinct srflx ports. TURN URLs are skipped:
//! relay allocation is out of scope.

pub mod protocol;

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::Instant;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::nat::config::StunOptions;
use crate::nat::error::{NatError, NatResult};
use crate::nat::ice::candidate::{
    calculate_foundation, calculate_priority, CandidateLine, CandidateType, TransportProtocol,
};
use crate::nat::ice::transport::{
    CandidateNotification, IceGatheringState, IceServer, IceTransport, TransportFactory,
    TransportHandle,
};
use self::protocol::{
    decode_binding_response, encode_binding_request, new_transaction_id, peek_transaction_id,
    TransactionId,
};

/// Default STUN port (RFC 5389 Section 9)
pub const DEFAULT_STUN_PORT: u16 = 3478;

/// Local preference for the single gathering socket
const LOCAL_PREFERENCE: u32 = 65535;
const COMPONENT_ID: u32 = 1;

/// A `stun:` URL reduced to host and port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunUrl {
    /// Hostname or IP literal, without IPv6 brackets
    pub host: String,
    /// Port, 3478 when the URL omits it
    pub port: u16,
}

impl StunUrl {
    /// Parse `stun:host[:port][?params]`.
    ///
    /// Returns `Ok(None)` for schemes this transport does not serve (`turn:`,
    /// `turns:`, `stuns:`).
    pub fn parse(url: &str) -> NatResult<Option<Self>> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once(':')
            .ok_or_else(|| NatError::Configuration(format!("missing scheme in {:?}", url)))?;

        match scheme.to_ascii_lowercase().as_str() {
            "stun" => {}
            "stuns" | "turn" | "turns" => return Ok(None),
            other => {
                return Err(NatError::Configuration(format!(
                    "unsupported scheme {:?} in {:?}",
                    other, url
                )))
            }
        }

        let authority = rest.split('?').next().unwrap_or_default();
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| NatError::Configuration(format!("unterminated IPv6 host in {:?}", url)))?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port),
                None if after.is_empty() => None,
                None => {
                    return Err(NatError::Configuration(format!("garbage after host in {:?}", url)))
                }
            };
            (host, port)
        } else if authority.matches(':').count() == 1 {
            let (host, port) = authority.split_once(':').unwrap_or((authority, ""));
            (host, Some(port))
        } else {
            (authority, None)
        };

        if host.is_empty() {
            return Err(NatError::Configuration(format!("missing host in {:?}", url)));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| NatError::Configuration(format!("invalid port in {:?}", url)))?,
            None => DEFAULT_STUN_PORT,
        };

        Ok(Some(Self {
            host: host.to_string(),
            port,
        }))
    }

    async fn resolve(&self, want_ipv4: bool) -> NatResult<SocketAddr> {
        let addrs = lookup_host((self.host.as_str(), self.port)).await?;
        addrs
            .into_iter()
            .find(|a| a.is_ipv4() == want_ipv4)
            .ok_or_else(|| NatError::stun(format!("no usable address for {}", self)))
    }
}

impl fmt::Display for StunUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "stun:[{}]:{}", self.host, self.port)
        } else {
            write!(f, "stun:{}:{}", self.host, self.port)
        }
    }
}

/// Builds [`StunTransport`]s
#[derive(Debug, Clone, Default)]
pub struct StunTransportFactory {
    options: StunOptions,
}

impl StunTransportFactory {
    /// Factory whose transports use `options`
    pub fn new(options: StunOptions) -> Self {
        Self { options }
    }
}

impl TransportFactory for StunTransportFactory {
    fn create(&self, servers: &[IceServer]) -> NatResult<TransportHandle> {
        let mut targets = Vec::new();
        for url in servers.iter().flat_map(|s| s.urls.iter()) {
            match StunUrl::parse(url)? {
                Some(target) => targets.push(target),
                None => debug!("Skipping non-STUN server URL {}", url),
            }
        }

        if targets.is_empty() {
            warn!("No STUN URLs configured; no server-reflexive candidates will be gathered");
        }

        let socket = StdUdpSocket::bind(self.options.bind_addr)?;
        socket.set_nonblocking(true)?;
        debug!("Gathering socket bound to {}", socket.local_addr()?);

        let (tx, rx) = mpsc::unbounded_channel();
        let transport = StunTransport {
            options: self.options.clone(),
            targets,
            socket: Some(socket),
            events: Some(tx),
            state: Arc::new(Mutex::new(IceGatheringState::New)),
            task: None,
        };

        Ok(TransportHandle {
            transport: Box::new(transport),
            candidates: rx,
        })
    }
}

/// One gathering socket plus its background gathering task
pub struct StunTransport {
    options: StunOptions,
    targets: Vec<StunUrl>,
    socket: Option<StdUdpSocket>,
    events: Option<mpsc::UnboundedSender<CandidateNotification>>,
    state: Arc<Mutex<IceGatheringState>>,
    task: Option<JoinHandle<()>>,
}

impl IceTransport for StunTransport {
    fn generate_offer(&mut self) -> BoxFuture<'_, NatResult<()>> {
        Box::pin(async move {
            let (socket, events) = match (self.socket.take(), self.events.take()) {
                (Some(socket), Some(events)) => (socket, events),
                _ => return Err(NatError::InvalidState("offer already generated".to_string())),
            };

            let socket = UdpSocket::from_std(socket)?;
            *self.state.lock() = IceGatheringState::Gathering;

            let gatherer = Gatherer {
                socket,
                targets: self.targets.clone(),
                options: self.options.clone(),
                state: Arc::clone(&self.state),
                events,
            };
            self.task = Some(tokio::spawn(gatherer.run()));
            Ok(())
        })
    }

    fn gathering_state(&self) -> IceGatheringState {
        *self.state.lock()
    }
}

impl Drop for StunTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Gatherer {
    socket: UdpSocket,
    targets: Vec<StunUrl>,
    options: StunOptions,
    state: Arc<Mutex<IceGatheringState>>,
    events: mpsc::UnboundedSender<CandidateNotification>,
}

impl Gatherer {
    async fn run(self) {
        match self.socket.local_addr() {
            Ok(local) => {
                if self.options.include_host_candidates {
                    for ip in host_addresses(local) {
                        self.emit(CandidateLine {
                            foundation: calculate_foundation(CandidateType::Host, &ip, None),
                            component_id: COMPONENT_ID,
                            protocol: TransportProtocol::Udp,
                            priority: calculate_priority(CandidateType::Host, LOCAL_PREFERENCE, COMPONENT_ID),
                            address: ip,
                            port: local.port(),
                            typ: CandidateType::Host,
                            related: None,
                        });
                    }
                }

                for (server, mapped) in self.query_servers(local).await {
                    self.emit(CandidateLine {
                        foundation: calculate_foundation(
                            CandidateType::ServerReflexive,
                            &local.ip(),
                            Some(&server.ip()),
                        ),
                        component_id: COMPONENT_ID,
                        protocol: TransportProtocol::Udp,
                        priority: calculate_priority(
                            CandidateType::ServerReflexive,
                            LOCAL_PREFERENCE,
                            COMPONENT_ID,
                        ),
                        address: mapped.ip(),
                        port: mapped.port(),
                        typ: CandidateType::ServerReflexive,
                        related: Some((local.ip(), local.port())),
                    });
                }
            }
            Err(e) => warn!("Gathering socket has no local address: {}", e),
        }

        *self.state.lock() = IceGatheringState::Complete;
        let _ = self.events.send(None);
    }

    fn emit(&self, line: CandidateLine) {
        let line = line.to_candidate_line();
        trace!("Emitting {}", line);
        let _ = self.events.send(Some(line));
    }

    /// Query every server in parallel from the one socket, retransmitting
    /// with a doubling RTO. Returns (server, mapped address) per answer.
    async fn query_servers(&self, local: SocketAddr) -> Vec<(SocketAddr, SocketAddr)> {
        let mut pending: HashMap<TransactionId, (SocketAddr, &StunUrl)> = HashMap::new();
        for target in &self.targets {
            match target.resolve(local.is_ipv4()).await {
                Ok(addr) => {
                    pending.insert(new_transaction_id(), (addr, target));
                }
                Err(e) => debug!("Cannot resolve {}: {}", target, e),
            }
        }

        let mut answers = Vec::new();
        let mut rto = self.options.initial_rto();
        let mut buf = vec![0u8; 1500];

        for attempt in 1..=self.options.max_retries {
            if pending.is_empty() {
                break;
            }

            for (tid, (addr, target)) in &pending {
                if let Err(e) = self.socket.send_to(&encode_binding_request(tid), *addr).await {
                    debug!("Binding request to {} failed: {}", target, e);
                }
            }
            trace!("Binding round {} to {} server(s), rto {:?}", attempt, pending.len(), rto);

            let round_end = Instant::now() + rto;
            while !pending.is_empty() {
                let remaining = round_end.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }

                let (len, from) = match timeout(remaining, self.socket.recv_from(&mut buf)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => {
                        // ICMP unreachable surfaces here on some platforms
                        debug!("Receive error: {}", e);
                        continue;
                    }
                    Err(_) => break,
                };

                let data = &buf[..len];
                let Some(tid) = peek_transaction_id(data) else {
                    trace!("Ignoring non-STUN datagram from {}", from);
                    continue;
                };
                let Some(&(addr, target)) = pending.get(&tid) else {
                    continue;
                };
                if from != addr {
                    debug!("Response for {} came from {}", target, from);
                    continue;
                }

                pending.remove(&tid);
                match decode_binding_response(data, &tid) {
                    Ok(mapped) => {
                        debug!("{} sees us as {}", target, mapped);
                        answers.push((addr, mapped));
                    }
                    Err(e) => debug!("{} answered with {}", target, e),
                }
            }

            rto = (rto * 2).min(self.options.max_rto());
        }

        for (_, target) in pending.values() {
            debug!("No response from {}", target);
        }

        answers
    }
}

/// Host candidate addresses for a socket bound to `local`
fn host_addresses(local: SocketAddr) -> Vec<IpAddr> {
    if !local.ip().is_unspecified() {
        return vec![local.ip()];
    }

    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .map(|iface| iface.ip())
            .filter(|ip| !ip.is_loopback() && ip.is_ipv4() == local.is_ipv4())
            .collect(),
        Err(e) => {
            warn!("Cannot enumerate interfaces: {}", e);
            Vec::new()
        }
    }
}
